use std::fs::File;

/// Receives every newly published ruleset file.
///
/// Each distributor gets its own duplicated handle. Publishing happens on
/// the service task, so implementations should hand the file off rather
/// than block.
pub trait RulesetDistributor: Send {
    fn publish_new_ruleset_version(&mut self, ruleset_data: File);
}

impl<F> RulesetDistributor for F
where
    F: FnMut(File) + Send,
{
    fn publish_new_ruleset_version(&mut self, ruleset_data: File) {
        self(ruleset_data)
    }
}
