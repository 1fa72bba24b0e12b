use std::collections::HashMap;
use std::rc::Rc;

use crate::clients::{HttpSession, IssueTracker, JobCluster, ScheduleSource};
use crate::config::Config;
use crate::report::Report;
use crate::rule::RuleSet;
use crate::state::ReleaseRuleState;
use crate::template::TemplateManager;
use crate::value::Params;

/// Mutable state shared by every prerequisite during one run.
pub struct RuntimeContext {
    pub rules: Rc<RuleSet>,
    pub template: TemplateManager,
    pub report: Report,
    pub config: Config,
    pub jira: Box<dyn IssueTracker>,
    pub pp: Box<dyn ScheduleSource>,
    pub session: HttpSession,
    pub openshift: Option<Box<dyn JobCluster>>,
    /// Rule name to params snapshot and final state, reset per input value.
    pub rule_template_params: HashMap<String, (Params, ReleaseRuleState)>,
}

impl RuntimeContext {
    pub fn new(
        rules: RuleSet,
        config: Config,
        jira: Box<dyn IssueTracker>,
        pp: Box<dyn ScheduleSource>,
        session: HttpSession,
        openshift: Option<Box<dyn JobCluster>>,
    ) -> Self {
        Self {
            rules: Rc::new(rules),
            template: TemplateManager::new(),
            report: Report::new(),
            config,
            jira,
            pp,
            session,
            openshift,
            rule_template_params: HashMap::new(),
        }
    }

    /// Runs `f` inside a named report section.
    pub fn section<T>(&mut self, name: &str, f: impl FnOnce(&mut Self) -> T) -> T {
        self.report.enter(name);
        let result = f(self);
        self.report.leave();
        result
    }

    /// Renders `text`, falling back to the raw text on error. Used for
    /// report section names.
    pub fn render_or_raw(&self, text: &str) -> String {
        self.template
            .render(text)
            .unwrap_or_else(|_| text.to_string())
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::clients::{Comment, Issue, Phase, ScheduleTask, Transition};
    use crate::error::{RetascError, Result};
    use crate::rule::Rule;
    use crate::value::{Map, Value};
    use chrono::NaiveDate;
    use std::cell::RefCell;
    use std::path::Path;
    use std::time::Duration;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn value_map(value: Value) -> Map {
        match value {
            Value::Map(map) => map,
            other => panic!("expected a map, got {other}"),
        }
    }

    // -- Issue tracker ------------------------------------------------------

    #[derive(Debug, Default)]
    pub struct TrackerState {
        pub issues: Vec<Issue>,
        /// Status name to transitions available from it.
        pub workflow: HashMap<String, Vec<Transition>>,
        pub comments: HashMap<String, Vec<Comment>>,
        pub searches: Vec<String>,
        pub created: Vec<Map>,
        pub edited: Vec<(String, Map)>,
        pub transitioned: Vec<(String, String)>,
        pub added_comments: Vec<(String, String)>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeTracker {
        pub state: Rc<RefCell<TrackerState>>,
    }

    impl FakeTracker {
        pub fn add_issue(&self, key: &str, fields: Value) {
            self.state
                .borrow_mut()
                .issues
                .push(Issue::new(key, value_map(fields)));
        }

        pub fn add_transition(&self, from: &str, id: &str, to: &str) {
            self.state
                .borrow_mut()
                .workflow
                .entry(from.to_string())
                .or_default()
                .push(Transition {
                    id: id.to_string(),
                    name: format!("To {to}"),
                    to: to.to_string(),
                });
        }

        pub fn mutation_count(&self) -> usize {
            let state = self.state.borrow();
            state.created.len()
                + state.edited.len()
                + state.transitioned.len()
                + state.added_comments.len()
        }
    }

    fn label_in_jql(jql: &str) -> Option<String> {
        let start = jql.find("labels=\"")? + "labels=\"".len();
        let end = jql[start..].find('"')? + start;
        Some(jql[start..end].to_string())
    }

    impl IssueTracker for FakeTracker {
        fn search_issues(&self, jql: &str, _fields: &[String]) -> Result<Vec<Issue>> {
            let mut state = self.state.borrow_mut();
            state.searches.push(jql.to_string());
            let label = label_in_jql(jql);
            Ok(state
                .issues
                .iter()
                .filter(|issue| match &label {
                    Some(label) => issue.labels().contains(label),
                    None => true,
                })
                .cloned()
                .collect())
        }

        fn create_issue(&self, fields: &Map) -> Result<Issue> {
            let mut state = self.state.borrow_mut();
            state.created.push(fields.clone());
            let mut issue_fields = fields.clone();
            issue_fields.insert("resolution".into(), Value::Null);
            let issue = Issue::new(format!("TEST-{}", state.issues.len() + 1), issue_fields);
            state.issues.push(issue.clone());
            Ok(issue)
        }

        fn edit_issue(&self, key: &str, fields: &Map) -> Result<()> {
            let mut state = self.state.borrow_mut();
            state.edited.push((key.to_string(), fields.clone()));
            if let Some(issue) = state.issues.iter_mut().find(|i| i.key == key) {
                issue.fields.extend(fields.clone());
            }
            Ok(())
        }

        fn get_issue_transitions(&self, key: &str) -> Result<Vec<Transition>> {
            let state = self.state.borrow();
            let status = state
                .issues
                .iter()
                .find(|i| i.key == key)
                .map(|i| i.status().to_string())
                .unwrap_or_default();
            Ok(state.workflow.get(&status).cloned().unwrap_or_default())
        }

        fn transition_issue(&self, key: &str, transition_id: &str) -> Result<()> {
            let mut state = self.state.borrow_mut();
            state
                .transitioned
                .push((key.to_string(), transition_id.to_string()));
            let target = state
                .workflow
                .values()
                .flatten()
                .find(|t| t.id == transition_id)
                .map(|t| t.to.clone())
                .ok_or_else(|| RetascError::prerequisite("unknown transition"))?;
            if let Some(issue) = state.issues.iter_mut().find(|i| i.key == key) {
                issue
                    .fields
                    .insert("status".into(), crate::value::map([("name", target)]));
            }
            Ok(())
        }

        fn get_issue_comments(&self, key: &str) -> Result<Vec<Comment>> {
            Ok(self
                .state
                .borrow()
                .comments
                .get(key)
                .cloned()
                .unwrap_or_default())
        }

        fn add_comment(&self, key: &str, body: &str) -> Result<()> {
            let mut state = self.state.borrow_mut();
            state
                .added_comments
                .push((key.to_string(), body.to_string()));
            state.comments.entry(key.to_string()).or_default().push(Comment {
                id: "new".into(),
                body: body.to_string(),
            });
            Ok(())
        }
    }

    // -- Schedule source ----------------------------------------------------

    #[derive(Debug, Default)]
    pub struct ScheduleState {
        pub releases: Vec<(String, Phase)>,
        pub schedules: HashMap<String, Vec<ScheduleTask>>,
        pub release_calls: usize,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeSchedule {
        pub state: Rc<RefCell<ScheduleState>>,
    }

    impl FakeSchedule {
        pub fn add_release(&self, release: &str, phase: Phase) {
            self.state
                .borrow_mut()
                .releases
                .push((release.to_string(), phase));
        }

        pub fn add_task(&self, release: &str, name: &str, start: NaiveDate, end: NaiveDate) {
            self.state
                .borrow_mut()
                .schedules
                .entry(release.to_string())
                .or_default()
                .push(ScheduleTask {
                    name: name.to_string(),
                    slug: format!("product.{name}"),
                    start_date: start,
                    end_date: end,
                    is_draft: false,
                });
        }
    }

    impl ScheduleSource for FakeSchedule {
        fn active_releases(
            &self,
            _product: &str,
            min_phase: Phase,
            max_phase: Phase,
        ) -> Result<Vec<String>> {
            let mut state = self.state.borrow_mut();
            state.release_calls += 1;
            Ok(state
                .releases
                .iter()
                .filter(|(_, phase)| (min_phase..=max_phase).contains(phase))
                .map(|(name, _)| name.clone())
                .collect())
        }

        fn release_schedules(&self, release: &str) -> Result<Vec<ScheduleTask>> {
            Ok(self
                .state
                .borrow()
                .schedules
                .get(release)
                .cloned()
                .unwrap_or_default())
        }
    }

    // -- Job cluster --------------------------------------------------------

    #[derive(Debug, Default)]
    pub struct ClusterState {
        pub pipeline_runs: HashMap<String, Value>,
        pub config_maps: HashMap<String, Value>,
        pub created: Vec<(Value, String)>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct FakeCluster {
        pub state: Rc<RefCell<ClusterState>>,
    }

    impl JobCluster for FakeCluster {
        fn get_pipeline_run(&self, name: &str, _namespace: &str) -> Result<Option<Value>> {
            Ok(self.state.borrow().pipeline_runs.get(name).cloned())
        }

        fn get_config_map(&self, name: &str, _namespace: &str) -> Result<Option<Value>> {
            Ok(self.state.borrow().config_maps.get(name).cloned())
        }

        fn create_pipeline_run(&self, pipeline_run: &Value, namespace: &str) -> Result<Value> {
            self.state
                .borrow_mut()
                .created
                .push((pipeline_run.clone(), namespace.to_string()));
            Ok(pipeline_run.clone())
        }
    }

    // -- Context ------------------------------------------------------------

    pub struct Fakes {
        pub jira: FakeTracker,
        pub pp: FakeSchedule,
        pub cluster: FakeCluster,
    }

    pub fn test_config(root: &Path) -> Config {
        let mut config = Config::new(
            root.join("rules"),
            root.join("templates"),
            "https://pp.example.com/pp/api/latest",
            "https://jira.example.com",
        );
        config.jira_label_prefix = "retasc-id-".into();
        config.jira_fields = [
            ("summary", "summary"),
            ("description", "description"),
            ("labels", "labels"),
            ("project", "project"),
            ("issue_type", "issuetype"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        config.pipeline_run_template_path = root.join("pipeline_runs");
        config.pipeline_run_default_namespace = Some("default".into());
        config.openshift_api_url = Some("https://api.openshift.example.com".into());
        config.openshift_oc_image = "registry.example.com/origin-cli:latest".into();
        config
    }

    pub fn context_with(rules: Vec<Rule>, config: Config) -> (RuntimeContext, Fakes) {
        let fakes = Fakes {
            jira: FakeTracker::default(),
            pp: FakeSchedule::default(),
            cluster: FakeCluster::default(),
        };
        let session = HttpSession::new(Duration::from_secs(5), Duration::from_secs(5))
            .unwrap()
            .with_retry_delay(Duration::ZERO);
        let mut context = RuntimeContext::new(
            RuleSet::new(rules),
            config,
            Box::new(fakes.jira.clone()),
            Box::new(fakes.pp.clone()),
            session,
            Some(Box::new(fakes.cluster.clone())),
        );
        context.template = TemplateManager::with_today(date(2024, 5, 15));
        (context, fakes)
    }

    pub fn context(root: &Path) -> (RuntimeContext, Fakes) {
        context_with(Vec::new(), test_config(root))
    }
}
