/// Monotonic id source owned by one manager. Ids start at 1 and are never
/// handed out twice.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub(crate) fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}
