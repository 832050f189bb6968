//! Decides which objects take part in the link. Ordinary objects always
//! participate; archive members are pulled in only when they define a symbol
//! that is still undefined, repeating until a pass pulls nothing new.

use crate::error::LinkError;
use crate::error::Result;
use crate::model::Object;
use crate::model::ObjectKind;
use crate::model::Symbol;
use crate::model::SymbolBinding;
use ahash::AHashSet;

/// Returns the objects that will participate in the link: ordinary objects
/// in input order, then pulled archive members in pull order.
#[tracing::instrument(skip_all, name = "Select participants")]
pub(crate) fn select_participants(objects: &[Object]) -> Result<Vec<&Object>> {
    let mut participants: Vec<&Object> = Vec::new();
    let mut archives: Vec<&Object> = Vec::new();
    for obj in objects {
        if obj.kind == ObjectKind::Archive {
            archives.push(obj);
        } else {
            participants.push(obj);
        }
    }

    let mut resolved: AHashSet<&str> = AHashSet::new();
    let mut undefined: AHashSet<&str> = AHashSet::new();
    for obj in &participants {
        for sym in &obj.symbols {
            if !names_a_global(sym) {
                continue;
            }
            if sym.binding == SymbolBinding::Undefined {
                undefined.insert(&sym.name);
            } else {
                resolved.insert(&sym.name);
            }
        }
    }
    undefined.retain(|name| !resolved.contains(name));

    // Pull members that satisfy a current demand, to a fixed point. Any
    // archive we pulled from is dropped so a later pass doesn't revisit it.
    loop {
        let mut pulled_any = false;
        archives.retain(|archive| {
            let mut pulled_from_archive = false;
            for member in &archive.members {
                let defines_needed = member.symbols.iter().any(|sym| {
                    names_a_global(sym)
                        && sym.binding != SymbolBinding::Undefined
                        && undefined.contains(sym.name.as_str())
                });
                if !defines_needed {
                    continue;
                }
                tracing::debug!(member = %member.name, archive = %archive.name, "Pulled archive member");
                participants.push(member);
                pulled_from_archive = true;
                for sym in &member.symbols {
                    if !names_a_global(sym) {
                        continue;
                    }
                    if sym.binding != SymbolBinding::Undefined {
                        resolved.insert(&sym.name);
                        undefined.remove(sym.name.as_str());
                    } else if !resolved.contains(sym.name.as_str()) {
                        undefined.insert(&sym.name);
                    }
                }
            }
            pulled_any |= pulled_from_archive;
            !pulled_from_archive
        });
        if !pulled_any {
            break;
        }
    }

    if participants.is_empty() {
        return Err(LinkError::NoInput.into());
    }
    Ok(participants)
}

/// Whether the symbol's name is visible to archive selection. Local symbols
/// and dot-prefixed labels can't satisfy or create demand.
fn names_a_global(sym: &Symbol) -> bool {
    !sym.name.is_empty() && !sym.name.starts_with('.') && sym.binding != SymbolBinding::Local
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;

    fn symbol(name: &str, binding: SymbolBinding) -> Symbol {
        Symbol {
            name: name.to_owned(),
            binding,
            section: (binding != SymbolBinding::Undefined).then(|| ".text".to_owned()),
            offset: 0,
        }
    }

    fn object(name: &str, symbols: &[Symbol]) -> Object {
        let mut obj = Object::new(name, ObjectKind::Relocatable);
        obj.symbols = symbols.to_vec();
        obj
    }

    fn archive(name: &str, members: Vec<Object>) -> Object {
        let mut obj = Object::new(name, ObjectKind::Archive);
        obj.members = members;
        obj
    }

    fn names(participants: &[&Object]) -> Vec<String> {
        participants.iter().map(|o| o.name.clone()).collect()
    }

    #[test]
    fn pulls_member_that_satisfies_demand() {
        let inputs = vec![
            object("main.o", &[symbol("puts", SymbolBinding::Undefined)]),
            archive(
                "libc.a",
                vec![
                    object("puts.o", &[symbol("puts", SymbolBinding::Global)]),
                    object("exit.o", &[symbol("exit", SymbolBinding::Global)]),
                ],
            ),
        ];
        let participants = select_participants(&inputs).unwrap();
        assert_eq!(names(&participants), ["main.o", "puts.o"]);
    }

    #[test]
    fn satisfied_demand_pulls_nothing() {
        let inputs = vec![
            object("main.o", &[symbol("helper", SymbolBinding::Undefined)]),
            object("helper.o", &[symbol("helper", SymbolBinding::Global)]),
            archive(
                "libhelper.a",
                vec![object("other.o", &[symbol("helper", SymbolBinding::Global)])],
            ),
        ];
        let participants = select_participants(&inputs).unwrap();
        assert_eq!(names(&participants), ["main.o", "helper.o"]);
    }

    #[test]
    fn member_demand_triggers_further_pulls() {
        // a.o needs b, which needs c, across two archives; selection must
        // chase the chain to a fixed point.
        let inputs = vec![
            object("a.o", &[symbol("b", SymbolBinding::Undefined)]),
            archive(
                "lib1.a",
                vec![object(
                    "b.o",
                    &[
                        symbol("b", SymbolBinding::Global),
                        symbol("c", SymbolBinding::Undefined),
                    ],
                )],
            ),
            archive(
                "lib2.a",
                vec![object("c.o", &[symbol("c", SymbolBinding::Global)])],
            ),
        ];
        let participants = select_participants(&inputs).unwrap();
        assert_eq!(names(&participants), ["a.o", "b.o", "c.o"]);
    }

    #[test]
    fn cyclic_member_dependencies_converge() {
        let inputs = vec![
            object("main.o", &[symbol("ping", SymbolBinding::Undefined)]),
            archive(
                "lib.a",
                vec![
                    object(
                        "ping.o",
                        &[
                            symbol("ping", SymbolBinding::Global),
                            symbol("pong", SymbolBinding::Undefined),
                        ],
                    ),
                    object(
                        "pong.o",
                        &[
                            symbol("pong", SymbolBinding::Global),
                            symbol("ping", SymbolBinding::Undefined),
                        ],
                    ),
                ],
            ),
        ];
        let participants = select_participants(&inputs).unwrap();
        assert_eq!(names(&participants), ["main.o", "ping.o", "pong.o"]);
    }

    #[test]
    fn empty_archive_is_inert() {
        let inputs = vec![
            object("main.o", &[symbol("x", SymbolBinding::Undefined)]),
            archive("empty.a", Vec::new()),
        ];
        let participants = select_participants(&inputs).unwrap();
        assert_eq!(names(&participants), ["main.o"]);
    }

    #[test]
    fn local_and_dot_symbols_create_no_demand() {
        let inputs = vec![
            object(
                "main.o",
                &[
                    symbol(".L0", SymbolBinding::Undefined),
                    symbol("tmp", SymbolBinding::Local),
                ],
            ),
            archive(
                "lib.a",
                vec![object(
                    "member.o",
                    &[symbol(".L0", SymbolBinding::Global), symbol("tmp", SymbolBinding::Global)],
                )],
            ),
        ];
        let participants = select_participants(&inputs).unwrap();
        assert_eq!(names(&participants), ["main.o"]);
    }

    #[test]
    fn no_participants_is_an_error() {
        let inputs = vec![archive(
            "lib.a",
            vec![object("member.o", &[symbol("x", SymbolBinding::Global)])],
        )];
        let err = select_participants(&inputs).unwrap_err();
        assert_eq!(err.downcast_ref::<LinkError>(), Some(&LinkError::NoInput));
    }
}
