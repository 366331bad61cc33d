use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Builds a model from the JSON object the server returned for it.
pub trait FromRecord: Sized {
    fn from_record(record: &Value) -> Result<Self, serde_json::Error>;
}

impl<T> FromRecord for T
where
    T: for<'de> Deserialize<'de>,
{
    fn from_record(record: &Value) -> Result<Self, serde_json::Error> {
        T::deserialize(record)
    }
}

/// `{id, name}` pointer the server embeds for related records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawUser", into = "RawUser")]
pub struct User {
    pub index: i64,
    pub login: String,
    pub firstname: String,
    pub lastname: String,
    pub mail: String,
    pub created_on: String,
    pub last_login_in: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawUser {
    id: i64,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    firstname: Option<String>,
    #[serde(default)]
    lastname: Option<String>,
    #[serde(default)]
    mail: Option<String>,
    #[serde(default)]
    created_on: Option<String>,
    #[serde(default)]
    last_login_on: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        let firstname = raw.firstname.unwrap_or_default();
        let lastname = raw.lastname.unwrap_or_default();
        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{firstname} {lastname}").trim().to_string());
        Self {
            index: raw.id,
            login: raw.login.unwrap_or_default(),
            firstname,
            lastname,
            mail: raw.mail.unwrap_or_default(),
            created_on: raw.created_on.unwrap_or_default(),
            last_login_in: raw.last_login_on.unwrap_or_default(),
            name,
        }
    }
}

impl From<User> for RawUser {
    fn from(user: User) -> Self {
        Self {
            id: user.index,
            login: Some(user.login),
            firstname: Some(user.firstname),
            lastname: Some(user.lastname),
            mail: Some(user.mail),
            created_on: Some(user.created_on),
            last_login_on: Some(user.last_login_in),
            name: Some(user.name),
        }
    }
}

impl User {
    pub fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.created_on)
    }

    pub fn last_login_at(&self) -> Option<DateTime<FixedOffset>> {
        parse_timestamp(&self.last_login_in)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStatus {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePriority {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
}

/// A saved issue query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub project_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub customized_type: String,
    #[serde(default)]
    pub field_format: String,
}

impl CustomField {
    /// Name the server accepts for sorting and filtering on this field.
    pub fn server_name(&self) -> String {
        format!("cf_{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    #[serde(default)]
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent: Option<NamedRef>,
    #[serde(default)]
    pub created_on: Option<String>,
    #[serde(default)]
    pub updated_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub filesize: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    pub content_url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<NamedRef>,
    #[serde(default)]
    pub created_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub project: NamedRef,
    pub tracker: NamedRef,
    pub status: NamedRef,
    pub priority: NamedRef,
    pub author: NamedRef,
    #[serde(default)]
    pub assigned_to: Option<NamedRef>,
    #[serde(default)]
    pub category: Option<NamedRef>,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub done_ratio: u8,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub created_on: Option<String>,
    #[serde(default)]
    pub updated_on: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Issue {
    pub fn due(&self) -> Option<NaiveDate> {
        self.due_date.as_deref().and_then(parse_date)
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start_date.as_deref().and_then(parse_date)
    }

    pub fn updated_at(&self) -> Option<DateTime<FixedOffset>> {
        self.updated_on.as_deref().and_then(parse_timestamp)
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn user_from_record_sets_all_fields() {
        let record = json!({
            "id": 7,
            "login": "jsmith",
            "firstname": "John",
            "lastname": "Smith",
            "mail": "jsmith@example.net",
            "created_on": "2013-07-15T10:00:00Z",
            "last_login_on": "2016-01-01T08:30:00Z"
        });

        let user = User::from_record(&record).expect("user should parse");
        assert_eq!(user.index, 7);
        assert_eq!(user.login, "jsmith");
        assert_eq!(user.firstname, "John");
        assert_eq!(user.lastname, "Smith");
        assert_eq!(user.mail, "jsmith@example.net");
        assert_eq!(user.created_on, "2013-07-15T10:00:00Z");
        assert_eq!(user.last_login_in, "2016-01-01T08:30:00Z");
        assert_eq!(user.name, "John Smith");
        assert!(user.created_at().is_some());
        assert!(user.last_login_at().is_some());
    }

    #[test]
    fn user_prefers_server_name_and_tolerates_missing_fields() {
        let user = User::from_record(&json!({"id": 3, "name": "Ada L."})).expect("parse");
        assert_eq!(user.index, 3);
        assert_eq!(user.name, "Ada L.");
        assert_eq!(user.login, "");
        assert!(user.created_at().is_none());
    }

    #[test]
    fn user_without_id_is_rejected() {
        assert!(User::from_record(&json!({"login": "nobody"})).is_err());
    }

    #[test]
    fn issue_from_record_parses_references_and_dates() {
        let record = json!({
            "id": 42,
            "project": {"id": 1, "name": "Facets"},
            "tracker": {"id": 2, "name": "Feature"},
            "status": {"id": 1, "name": "New"},
            "priority": {"id": 4, "name": "Normal"},
            "author": {"id": 7, "name": "John Smith"},
            "assigned_to": {"id": 8, "name": "Ada"},
            "subject": "Support offline mode",
            "description": "Cache projects locally",
            "start_date": "2016-01-02",
            "due_date": "2016-02-01",
            "done_ratio": 30,
            "estimated_hours": 4.5,
            "created_on": "2016-01-02T00:00:00Z",
            "updated_on": "2016-01-03T12:00:00Z",
            "attachments": [{
                "id": 9,
                "filename": "screen.png",
                "filesize": 1024,
                "content_type": "image/png",
                "content_url": "https://redmine.example/attachments/download/9/screen.png"
            }]
        });

        let issue = Issue::from_record(&record).expect("issue should parse");
        assert_eq!(issue.id, 42);
        assert_eq!(issue.project.name, "Facets");
        assert_eq!(issue.assigned_to.as_ref().map(|a| a.id), Some(8));
        assert!(issue.category.is_none());
        assert_eq!(issue.done_ratio, 30);
        assert_eq!(issue.estimated_hours, Some(4.5));
        assert_eq!(issue.due(), NaiveDate::from_ymd_opt(2016, 2, 1));
        assert_eq!(issue.start(), NaiveDate::from_ymd_opt(2016, 1, 2));
        assert!(issue.updated_at().is_some());
        assert_eq!(issue.attachments.len(), 1);
        assert_eq!(issue.attachments[0].filename, "screen.png");
    }

    #[test]
    fn enumerations_parse_with_defaults() {
        let status = IssueStatus::from_record(&json!({"id": 5, "name": "Closed", "is_closed": true}))
            .expect("status");
        assert!(status.is_closed);

        let priority =
            IssuePriority::from_record(&json!({"id": 2, "name": "Normal"})).expect("priority");
        assert!(!priority.is_default);

        let query = Query::from_record(&json!({"id": 1, "name": "Mine", "is_public": false}))
            .expect("query");
        assert_eq!(query.project_id, None);

        let field = CustomField::from_record(&json!({"id": 12, "name": "Severity"})).expect("cf");
        assert_eq!(field.server_name(), "cf_12");
    }
}
