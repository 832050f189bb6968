use crate::output_section_id::OutputSectionId;
use crate::output_section_id::NUM_OUTPUT_SECTIONS;

/// A map from each output section to some value.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub(crate) struct OutputSectionMap<T> {
    values: [T; NUM_OUTPUT_SECTIONS],
}

impl<T> OutputSectionMap<T> {
    pub(crate) fn get(&self, id: OutputSectionId) -> &T {
        &self.values[id.as_usize()]
    }

    pub(crate) fn get_mut(&mut self, id: OutputSectionId) -> &mut T {
        &mut self.values[id.as_usize()]
    }
}
