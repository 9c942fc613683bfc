//! Event routing: which workflows does an event start?

use crate::models::WorkflowDefinition;

/// Workflows whose trigger matches `event`, in input order.
///
/// A workflow matches when its `on:` is the event name itself, a list
/// containing it, or a mapping with it as a key.
pub fn route<I, W>(event: &str, workflows: I) -> Vec<W>
where
    I: IntoIterator<Item = W>,
    W: AsRef<WorkflowDefinition>,
{
    workflows
        .into_iter()
        .filter(|wf| wf.as_ref().trigger.matches(event))
        .collect()
}

impl AsRef<WorkflowDefinition> for WorkflowDefinition {
    fn as_ref(&self) -> &WorkflowDefinition {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::Value;

    use crate::models::Trigger;

    fn wf(name: &str, trigger: Trigger) -> WorkflowDefinition {
        WorkflowDefinition::new(name, trigger)
    }

    #[test]
    fn matches_every_trigger_form() {
        let workflows = vec![
            wf("single", Trigger::Event("push".into())),
            wf("list", Trigger::Events(vec!["pull_request".into(), "push".into()])),
            wf(
                "map",
                Trigger::Filtered(BTreeMap::from([("push".to_string(), Value::Null)])),
            ),
            wf("other", Trigger::Event("release".into())),
        ];

        let names: Vec<_> = route("push", &workflows)
            .into_iter()
            .map(|w| w.name.as_str())
            .collect();
        assert_eq!(names, ["single", "list", "map"]);
    }

    #[test]
    fn no_match_is_empty() {
        let workflows = vec![Arc::new(wf("ci", Trigger::Event("push".into())))];
        assert!(route("schedule", workflows).is_empty());
    }

    #[test]
    fn match_is_exact() {
        let workflows = [wf("ci", Trigger::Event("push".into()))];
        assert!(route("Push", &workflows).is_empty());
        assert!(route("push_tag", &workflows).is_empty());
    }
}
