/// Per-`simulate` summary counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepStats {
    pub neighbor_pairs: u32,
    pub awake_groups: u32,
    pub solve_chunks: u32,
}
