use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock};

use crate::attachments::AttachmentManager;
use crate::logging;
use crate::metrics::Metrics;
use crate::models::{Project, User};
use crate::redmine::{normalize_base_url, Credentials, RedmineClient, RedmineError};

static SHARED: OnceLock<RwLock<AppState>> = OnceLock::new();

/// Process-wide client state: server, credentials, the known projects and
/// which one the user last looked at.
#[derive(Debug)]
pub struct AppState {
    base_url: Option<String>,
    credentials: Credentials,
    projects: Vec<Project>,
    current_project_id: Option<i64>,
    current_user: Option<User>,
    attachment_manager: AttachmentManager,
    metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(attachment_dir: impl Into<PathBuf>, metrics: Arc<Metrics>) -> Self {
        Self {
            base_url: None,
            credentials: Credentials::default(),
            projects: Vec::new(),
            current_project_id: None,
            current_user: None,
            attachment_manager: AttachmentManager::new(attachment_dir),
            metrics,
        }
    }

    /// The shared instance, created on first use with attachments under the
    /// system temp directory.
    pub fn shared() -> &'static RwLock<AppState> {
        SHARED.get_or_init(|| {
            RwLock::new(AppState::new(
                std::env::temp_dir().join("facets-attachments"),
                Arc::new(Metrics::new()),
            ))
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn set_base_url(&mut self, base_url: &str) -> Result<(), RedmineError> {
        self.base_url = Some(normalize_base_url(base_url)?);
        Ok(())
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.credentials.password.as_deref()
    }

    pub fn cookie(&self) -> Option<&str> {
        self.credentials.cookie.as_deref()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn attachment_manager(&self) -> &AttachmentManager {
        &self.attachment_manager
    }

    pub fn set_attachment_manager(&mut self, manager: AttachmentManager) {
        self.attachment_manager = manager;
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_user.as_ref()
    }

    pub fn is_user_logged_in(&self) -> bool {
        self.base_url.is_some() && self.credentials.has_any()
    }

    pub fn server_sync(&self) -> Result<RedmineClient, RedmineError> {
        let base_url = self.base_url.as_deref().ok_or(RedmineError::NotLoggedIn)?;
        RedmineClient::new_with_metrics(base_url, self.credentials.clone(), self.metrics())
    }

    /// Verifies the credentials against the server and keeps them, together
    /// with any session cookie the server handed out. Failed logins leave
    /// the state logged out.
    pub fn login(&mut self, base_url: &str, credentials: Credentials) -> Result<User, RedmineError> {
        self.logout();
        self.set_base_url(base_url)?;
        self.credentials = credentials;

        let outcome = self.server_sync().and_then(|client| client.current_user());
        match outcome {
            Ok(current) => {
                if let Some(cookie) = current.session_cookie {
                    self.credentials.cookie = Some(cookie);
                }
                logging::info(format!(
                    "logged in to {} as {}",
                    self.base_url.as_deref().unwrap_or_default(),
                    current.user.login
                ));
                self.current_user = Some(current.user.clone());
                Ok(current.user)
            }
            Err(err) => {
                logging::warn(format!("login failed: {err}"));
                self.logout();
                Err(err)
            }
        }
    }

    pub fn logout(&mut self) {
        self.base_url = None;
        self.credentials = Credentials::default();
        self.projects.clear();
        self.current_project_id = None;
        self.current_user = None;
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Replaces the project list. A selection that no longer exists moves to
    /// the first project.
    pub fn set_projects(&mut self, projects: Vec<Project>) {
        self.projects = projects;
        let still_present = self
            .current_project_id
            .is_some_and(|id| self.projects.iter().any(|p| p.id == id));
        if !still_present {
            self.current_project_id = self.projects.first().map(|p| p.id);
        }
    }

    pub fn refresh_projects(&mut self) -> Result<&[Project], RedmineError> {
        let projects = self.server_sync()?.list_projects()?;
        logging::debug(format!("refreshed {} projects", projects.len()));
        self.set_projects(projects);
        Ok(&self.projects)
    }

    pub fn current_project_id(&self) -> Option<i64> {
        self.current_project_id
    }

    pub fn set_current_project_id(&mut self, id: Option<i64>) {
        self.current_project_id = id;
    }

    pub fn current_project(&self) -> Option<&Project> {
        let id = self.current_project_id?;
        self.projects.iter().find(|p| p.id == id)
    }
}
