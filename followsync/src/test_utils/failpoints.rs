use fail::FailScenario;

/// Fail scenario configuring a set of fail points and turning them off when dropped.
pub struct SyncFailScenario<'a> {
    _scenario: FailScenario<'a>,
    failpoints: Vec<String>,
}

impl<'a> SyncFailScenario<'a> {
    /// Sets up the scenario, configuring every `(fail point, action)` pair.
    ///
    /// Panics when an action does not parse.
    pub fn setup(failpoints: &[(&str, &str)]) -> SyncFailScenario<'a> {
        let scenario = FailScenario::setup();

        for (failpoint, action) in failpoints {
            fail::cfg(*failpoint, action)
                .unwrap_or_else(|err| panic!("invalid action for fail point {failpoint}: {err}"));
        }

        Self {
            _scenario: scenario,
            failpoints: failpoints
                .iter()
                .map(|(failpoint, _)| failpoint.to_string())
                .collect(),
        }
    }

    /// Turns a single fail point off before the scenario ends.
    pub fn disable(&self, failpoint: &str) {
        fail::remove(failpoint);
    }

    pub fn teardown(self) {
        drop(self);
    }
}

impl Drop for SyncFailScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.failpoints {
            fail::remove(failpoint);
        }
    }
}
