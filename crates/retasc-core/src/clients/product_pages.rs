//! Product Pages API client: active releases and release schedules.

use chrono::NaiveDate;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::http_session::HttpSession;
use crate::error::{RetascError, Result};
use crate::value::{Map, Value};

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Product Pages release phases, ordered by phase id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Concept,
    Planning,
    #[serde(rename = "Planning / Development / Testing")]
    PlanningDevelopmentTesting,
    #[serde(rename = "CI / CD")]
    CiCd,
    Development,
    #[serde(rename = "Development / Testing")]
    DevelopmentTesting,
    Testing,
    Exception,
    Launch,
    Maintenance,
    Unsupported,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Concept,
        Phase::Planning,
        Phase::PlanningDevelopmentTesting,
        Phase::CiCd,
        Phase::Development,
        Phase::DevelopmentTesting,
        Phase::Testing,
        Phase::Exception,
        Phase::Launch,
        Phase::Maintenance,
        Phase::Unsupported,
    ];

    /// Phase id as returned by `/api/v7/schedules/phases/`.
    pub fn id(self) -> u64 {
        match self {
            Phase::Concept => 100,
            Phase::Planning => 200,
            Phase::PlanningDevelopmentTesting => 230,
            Phase::CiCd => 270,
            Phase::Development => 300,
            Phase::DevelopmentTesting => 350,
            Phase::Testing => 400,
            Phase::Exception => 450,
            Phase::Launch => 500,
            Phase::Maintenance => 600,
            Phase::Unsupported => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Concept => "Concept",
            Phase::Planning => "Planning",
            Phase::PlanningDevelopmentTesting => "Planning / Development / Testing",
            Phase::CiCd => "CI / CD",
            Phase::Development => "Development",
            Phase::DevelopmentTesting => "Development / Testing",
            Phase::Testing => "Testing",
            Phase::Exception => "Exception",
            Phase::Launch => "Launch",
            Phase::Maintenance => "Maintenance",
            Phase::Unsupported => "Unsupported",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown release phase: {s}"))
    }
}

// ---------------------------------------------------------------------------
// ScheduleTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTask {
    pub name: String,
    pub slug: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub is_draft: bool,
}

impl ScheduleTask {
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), Value::from(&self.name));
        map.insert("slug".into(), Value::from(&self.slug));
        map.insert("start_date".into(), Value::Date(self.start_date));
        map.insert("end_date".into(), Value::Date(self.end_date));
        map.insert("is_draft".into(), Value::Bool(self.is_draft));
        Value::Map(map)
    }
}

// ---------------------------------------------------------------------------
// ScheduleSource
// ---------------------------------------------------------------------------

pub trait ScheduleSource {
    fn active_releases(
        &self,
        product: &str,
        min_phase: Phase,
        max_phase: Phase,
    ) -> Result<Vec<String>>;

    fn release_schedules(&self, release: &str) -> Result<Vec<ScheduleTask>>;
}

// ---------------------------------------------------------------------------
// ProductPagesApi
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReleaseItem {
    shortname: String,
    phase: u64,
}

#[derive(Deserialize)]
struct ScheduleTaskItem {
    name: String,
    #[serde(default)]
    slug: Option<String>,
    date_start: NaiveDate,
    date_finish: NaiveDate,
    #[serde(default)]
    draft: bool,
}

/// Results are cached per arguments for the lifetime of the client.
pub struct ProductPagesApi {
    api_url: String,
    session: HttpSession,
    releases: RefCell<HashMap<(String, Phase, Phase), Vec<String>>>,
    schedules: RefCell<HashMap<String, Vec<ScheduleTask>>>,
}

impl ProductPagesApi {
    pub fn new(api_url: &str, session: HttpSession) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            session,
            releases: RefCell::new(HashMap::new()),
            schedules: RefCell::new(HashMap::new()),
        }
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{path}", self.api_url);
        let data = self
            .session
            .send_json(self.session.request(Method::GET, &url).query(query))?;
        serde_json::from_value(data).map_err(|e| {
            RetascError::prerequisite(format!("Unexpected Product Pages response from {url}: {e}"))
        })
    }
}

impl ScheduleSource for ProductPagesApi {
    fn active_releases(
        &self,
        product: &str,
        min_phase: Phase,
        max_phase: Phase,
    ) -> Result<Vec<String>> {
        let key = (product.to_string(), min_phase, max_phase);
        if let Some(cached) = self.releases.borrow().get(&key) {
            return Ok(cached.clone());
        }

        let items: Vec<ReleaseItem> = self.get(
            "releases/",
            &[
                ("product__shortname", product),
                ("fields", "shortname,phase"),
            ],
        )?;
        // The releases endpoint ignores phase__gt/phase__lt, so filter here.
        let (lower, upper) = (min_phase.id(), max_phase.id());
        let releases: Vec<String> = items
            .into_iter()
            .filter(|item| (lower..=upper).contains(&item.phase))
            .map(|item| item.shortname)
            .collect();

        self.releases.borrow_mut().insert(key, releases.clone());
        Ok(releases)
    }

    fn release_schedules(&self, release: &str) -> Result<Vec<ScheduleTask>> {
        if let Some(cached) = self.schedules.borrow().get(release) {
            return Ok(cached.clone());
        }

        let items: Vec<ScheduleTaskItem> = self.get(
            &format!("releases/{release}/schedule-tasks"),
            &[("fields", "name,date_start,date_finish,draft,slug")],
        )?;
        let tasks: Vec<ScheduleTask> = items
            .into_iter()
            .map(|item| ScheduleTask {
                name: item.name,
                slug: item.slug.unwrap_or_default(),
                start_date: item.date_start,
                end_date: item.date_finish,
                is_draft: item.draft,
            })
            .collect();

        self.schedules
            .borrow_mut()
            .insert(release.to_string(), tasks.clone());
        Ok(tasks)
    }
}
