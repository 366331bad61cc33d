use std::sync::OnceLock;

use regex::Regex;

use crate::models::CustomField;

/// A field the issue list can be sorted or filtered by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub display_name: String,
    pub server_name: String,
}

impl SortField {
    pub fn new(display_name: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            server_name: server_name.into(),
        }
    }
}

impl From<&CustomField> for SortField {
    fn from(field: &CustomField) -> Self {
        Self::new(field.name.clone(), field.server_name())
    }
}

const DEFAULT_FIELDS: [(&str, &str); 12] = [
    ("Project", "project"),
    ("Tracker", "tracker"),
    ("Status", "status"),
    ("Priority", "priority"),
    ("Author", "author"),
    ("Category", "category"),
    ("Start Date", "start_date"),
    ("Due Date", "due_date"),
    ("Percent Done", "done_ratio"),
    ("Estimated Hours", "estimated_hours"),
    ("Creation Date", "created_on"),
    ("Last Updated", "updated_on"),
];

/// Built-in fields followed by the issue custom fields the server exposes.
pub fn available_sort_fields(custom_fields: &[CustomField]) -> Vec<SortField> {
    DEFAULT_FIELDS
        .iter()
        .map(|(display, server)| SortField::new(*display, *server))
        .chain(
            custom_fields
                .iter()
                .filter(|f| f.customized_type.is_empty() || f.customized_type == "issue")
                .map(SortField::from),
        )
        .collect()
}

fn field_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(cf_[0-9]+|[a-z][a-z_.]*)$").expect("sort field pattern is valid")
    })
}

pub fn is_valid_sort_field(field: &str) -> bool {
    field_name_pattern().is_match(field)
}

/// Value for the server's `sort` parameter, e.g. `due_date:desc`.
pub fn sort_param(field: &str, ascending: bool) -> Option<String> {
    let field = field.trim();
    if !is_valid_sort_field(field) {
        return None;
    }
    if ascending {
        Some(field.to_string())
    } else {
        Some(format!("{field}:desc"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Open,
    Closed,
    All,
    Id(i64),
}

impl StatusFilter {
    fn param(self) -> String {
        match self {
            Self::Open => "open".to_string(),
            Self::Closed => "closed".to_string(),
            Self::All => "*".to_string(),
            Self::Id(id) => id.to_string(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "open" => Some(Self::Open),
            "closed" => Some(Self::Closed),
            "all" | "*" => Some(Self::All),
            other => other.parse().ok().map(Self::Id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssigneeFilter {
    Me,
    User(i64),
}

/// Filters applied to every issue list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    pub status: StatusFilter,
    pub tracker_id: Option<i64>,
    pub assignee: Option<AssigneeFilter>,
}

impl IssueFilter {
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("status_id", self.status.param())];
        if let Some(tracker) = self.tracker_id {
            params.push(("tracker_id", tracker.to_string()));
        }
        match self.assignee {
            Some(AssigneeFilter::Me) => params.push(("assigned_to_id", "me".to_string())),
            Some(AssigneeFilter::User(id)) => params.push(("assigned_to_id", id.to_string())),
            None => {}
        }
        params
    }
}
