use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{CacheError, OfflineCache, RecordKind};
use crate::logging;
use crate::models::{Issue, Project, Query};
use crate::redmine::{IssueListParams, IssuePage, RedmineClient, RedmineError};
use crate::session::AppState;
use crate::sort::{sort_param, IssueFilter};

pub const DEFAULT_PAGE_SIZE: usize = 25;

/// The server calls an issue list needs. [`RedmineClient`] is the real one.
pub trait IssueSource {
    fn list_issues(&self, params: &IssueListParams) -> Result<IssuePage, RedmineError>;
    fn delete_issue(&self, id: i64) -> Result<(), RedmineError>;
    fn list_projects(&self) -> Result<Vec<Project>, RedmineError>;
}

impl IssueSource for RedmineClient {
    fn list_issues(&self, params: &IssueListParams) -> Result<IssuePage, RedmineError> {
        RedmineClient::list_issues(self, params)
    }

    fn delete_issue(&self, id: i64) -> Result<(), RedmineError> {
        RedmineClient::delete_issue(self, id)
    }

    fn list_projects(&self) -> Result<Vec<Project>, RedmineError> {
        RedmineClient::list_projects(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ViewModelError {
    #[error(transparent)]
    Redmine(#[from] RedmineError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("no issue at index {index}; {len} issue(s) loaded")]
    IssueIndexOutOfRange { index: usize, len: usize },
    #[error("'{0}' is not a sortable issue field")]
    InvalidSortField(String),
}

/// What an issue list screen binds to.
///
/// Operations block until the server answers; their `Result` is the
/// completion. `&mut self` keeps calls on one list from overlapping.
pub trait IssueListViewModel {
    fn project_id(&self) -> Option<i64>;
    fn set_project_id(&mut self, project_id: Option<i64>);
    fn title(&self) -> &str;
    fn set_title(&mut self, title: String);

    /// Issues in server order as of the last successful load or append.
    fn issues(&self) -> &[Issue];
    fn should_show_project_selector(&self) -> bool;
    fn more_issues_available(&self) -> bool;
    fn is_loading(&self) -> bool;

    /// Replaces the list with the first page sorted by `field`.
    fn load_issues_sorted_by(&mut self, field: &str, ascending: bool)
        -> Result<(), ViewModelError>;

    /// Appends the next page. Returns at once when nothing more is available.
    fn load_more_issues(&mut self) -> Result<(), ViewModelError>;

    /// Deletes `issues()[index]` on the server, then locally.
    fn delete_issue_at_index(&mut self, index: usize) -> Result<(), ViewModelError>;

    /// Present when the list keeps an offline project cache.
    fn project_list(&mut self) -> Option<&mut dyn ProjectListCapability> {
        None
    }
}

pub trait ProjectListCapability {
    fn projects(&self) -> &[Project];
    fn refresh_project_list(&mut self) -> Result<(), ViewModelError>;
}

/// Shared view of a list's in-flight state, readable from other threads.
#[derive(Debug, Clone, Default)]
pub struct LoadingHandle(Arc<AtomicBool>);

impl LoadingHandle {
    pub fn is_loading(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn begin(&self) -> LoadingGuard<'_> {
        self.0.store(true, Ordering::SeqCst);
        LoadingGuard { handle: self }
    }
}

struct LoadingGuard<'a> {
    handle: &'a LoadingHandle,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.handle.0.store(false, Ordering::SeqCst);
    }
}

/// Pagination state shared by the concrete lists.
#[derive(Debug)]
struct IssuePager {
    issues: Vec<Issue>,
    total_count: usize,
    /// Scope and sort of the last full load; later pages reuse it as is.
    scope: IssueListParams,
    page_size: usize,
    loading: LoadingHandle,
}

impl IssuePager {
    fn new(page_size: usize) -> Self {
        Self {
            issues: Vec::new(),
            total_count: 0,
            scope: IssueListParams::default(),
            page_size: page_size.max(1),
            loading: LoadingHandle::default(),
        }
    }

    fn more_available(&self) -> bool {
        self.issues.len() < self.total_count
    }

    fn reset(&mut self) {
        self.issues.clear();
        self.total_count = 0;
    }

    fn load_first<S: IssueSource>(
        &mut self,
        source: &S,
        scope: IssueListParams,
        field: &str,
        ascending: bool,
    ) -> Result<(), ViewModelError> {
        let sort = sort_param(field, ascending)
            .ok_or_else(|| ViewModelError::InvalidSortField(field.to_string()))?;
        let params = IssueListParams {
            sort: Some(sort.clone()),
            offset: 0,
            limit: self.page_size,
            ..scope
        };

        let page = {
            let _loading = self.loading.begin();
            source.list_issues(&params)?
        };

        logging::debug(format!(
            "loaded first issue page sort={} count={} total={}",
            sort,
            page.issues.len(),
            page.total_count
        ));
        self.total_count = page.total_count.max(page.issues.len());
        self.issues = page.issues;
        self.scope = params;
        Ok(())
    }

    fn load_more<S: IssueSource>(&mut self, source: &S) -> Result<(), ViewModelError> {
        if !self.more_available() {
            return Ok(());
        }

        let params = IssueListParams {
            offset: self.issues.len(),
            limit: self.page_size,
            ..self.scope.clone()
        };

        let page = {
            let _loading = self.loading.begin();
            source.list_issues(&params)?
        };

        logging::debug(format!(
            "appended issue page offset={} count={} total={}",
            params.offset,
            page.issues.len(),
            page.total_count
        ));
        if page.issues.is_empty() {
            // The server ran out early; stop offering more.
            self.total_count = self.issues.len();
            return Ok(());
        }
        self.issues.extend(page.issues);
        self.total_count = page.total_count.max(self.issues.len());
        Ok(())
    }

    fn delete_at<S: IssueSource>(&mut self, source: &S, index: usize) -> Result<(), ViewModelError> {
        let issue_id = self
            .issues
            .get(index)
            .map(|issue| issue.id)
            .ok_or(ViewModelError::IssueIndexOutOfRange {
                index,
                len: self.issues.len(),
            })?;

        {
            let _loading = self.loading.begin();
            source.delete_issue(issue_id)?;
        }

        self.issues.remove(index);
        self.total_count = self.total_count.saturating_sub(1);
        Ok(())
    }
}

/// Issues of one project, with a project selector and an optional offline
/// project cache.
pub struct ProjectIssueListViewModel<S> {
    source: S,
    pager: IssuePager,
    project_id: Option<i64>,
    title: String,
    filter: IssueFilter,
    projects: Vec<Project>,
    cache: Option<OfflineCache>,
}

impl<S: IssueSource> ProjectIssueListViewModel<S> {
    pub fn new(source: S, project_id: Option<i64>) -> Self {
        Self {
            source,
            pager: IssuePager::new(DEFAULT_PAGE_SIZE),
            project_id,
            title: String::new(),
            filter: IssueFilter::default(),
            projects: Vec::new(),
            cache: None,
        }
    }

    /// Attaches an offline cache and seeds the project list from it.
    pub fn with_cache(mut self, cache: OfflineCache) -> Result<Self, CacheError> {
        self.projects = cache.load(RecordKind::Projects)?;
        self.cache = Some(cache);
        self.sync_title();
        Ok(self)
    }

    pub fn with_projects(mut self, projects: Vec<Project>) -> Self {
        self.projects = projects;
        self.sync_title();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.pager = IssuePager::new(page_size);
        self
    }

    pub fn filter(&self) -> &IssueFilter {
        &self.filter
    }

    /// New filters apply from the next full load.
    pub fn set_filter(&mut self, filter: IssueFilter) {
        self.filter = filter;
    }

    pub fn loading_handle(&self) -> LoadingHandle {
        self.pager.loading.clone()
    }

    fn scope(&self) -> IssueListParams {
        IssueListParams {
            project_id: self.project_id,
            filter: Some(self.filter.clone()),
            ..IssueListParams::default()
        }
    }

    fn sync_title(&mut self) {
        let Some(id) = self.project_id else {
            return;
        };
        if let Some(project) = self.projects.iter().find(|p| p.id == id) {
            self.title = project.name.clone();
        }
    }
}

impl ProjectIssueListViewModel<RedmineClient> {
    /// A list for the app state's selected project, talking to its server.
    pub fn for_current_project(state: &AppState) -> Result<Self, RedmineError> {
        Ok(Self::new(state.server_sync()?, state.current_project_id())
            .with_projects(state.projects().to_vec()))
    }
}

impl<S: IssueSource> IssueListViewModel for ProjectIssueListViewModel<S> {
    fn project_id(&self) -> Option<i64> {
        self.project_id
    }

    fn set_project_id(&mut self, project_id: Option<i64>) {
        if self.project_id == project_id {
            return;
        }
        self.project_id = project_id;
        self.pager.reset();
        self.sync_title();
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn set_title(&mut self, title: String) {
        self.title = title;
    }

    fn issues(&self) -> &[Issue] {
        &self.pager.issues
    }

    fn should_show_project_selector(&self) -> bool {
        true
    }

    fn more_issues_available(&self) -> bool {
        self.pager.more_available()
    }

    fn is_loading(&self) -> bool {
        self.pager.loading.is_loading()
    }

    fn load_issues_sorted_by(
        &mut self,
        field: &str,
        ascending: bool,
    ) -> Result<(), ViewModelError> {
        let scope = self.scope();
        self.pager.load_first(&self.source, scope, field, ascending)
    }

    fn load_more_issues(&mut self) -> Result<(), ViewModelError> {
        self.pager.load_more(&self.source)
    }

    fn delete_issue_at_index(&mut self, index: usize) -> Result<(), ViewModelError> {
        self.pager.delete_at(&self.source, index)
    }

    fn project_list(&mut self) -> Option<&mut dyn ProjectListCapability> {
        if self.cache.is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl<S: IssueSource> ProjectListCapability for ProjectIssueListViewModel<S> {
    fn projects(&self) -> &[Project] {
        &self.projects
    }

    fn refresh_project_list(&mut self) -> Result<(), ViewModelError> {
        let source = &self.source;
        let projects = match &self.cache {
            Some(cache) => cache.refresh_stale_safe(RecordKind::Projects, || {
                source.list_projects().map_err(ViewModelError::from)
            })?,
            None => source.list_projects()?,
        };
        logging::debug(format!("project list now has {} entries", projects.len()));
        self.projects = projects;
        self.sync_title();
        Ok(())
    }
}

/// Issues matched by a saved query. The query fixes the scope, so there is
/// no project selector.
pub struct QueryIssueListViewModel<S> {
    source: S,
    pager: IssuePager,
    query: Query,
    project_id: Option<i64>,
    title: String,
}

impl<S: IssueSource> QueryIssueListViewModel<S> {
    pub fn new(source: S, query: Query) -> Self {
        Self {
            source,
            pager: IssuePager::new(DEFAULT_PAGE_SIZE),
            project_id: query.project_id,
            title: query.name.clone(),
            query,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.pager = IssuePager::new(page_size);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn loading_handle(&self) -> LoadingHandle {
        self.pager.loading.clone()
    }

    fn scope(&self) -> IssueListParams {
        IssueListParams {
            project_id: self.project_id,
            query_id: Some(self.query.id),
            ..IssueListParams::default()
        }
    }
}

impl<S: IssueSource> IssueListViewModel for QueryIssueListViewModel<S> {
    fn project_id(&self) -> Option<i64> {
        self.project_id
    }

    fn set_project_id(&mut self, project_id: Option<i64>) {
        if self.project_id == project_id {
            return;
        }
        self.project_id = project_id;
        self.pager.reset();
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn set_title(&mut self, title: String) {
        self.title = title;
    }

    fn issues(&self) -> &[Issue] {
        &self.pager.issues
    }

    fn should_show_project_selector(&self) -> bool {
        false
    }

    fn more_issues_available(&self) -> bool {
        self.pager.more_available()
    }

    fn is_loading(&self) -> bool {
        self.pager.loading.is_loading()
    }

    fn load_issues_sorted_by(
        &mut self,
        field: &str,
        ascending: bool,
    ) -> Result<(), ViewModelError> {
        let scope = self.scope();
        self.pager.load_first(&self.source, scope, field, ascending)
    }

    fn load_more_issues(&mut self) -> Result<(), ViewModelError> {
        self.pager.load_more(&self.source)
    }

    fn delete_issue_at_index(&mut self, index: usize) -> Result<(), ViewModelError> {
        self.pager.delete_at(&self.source, index)
    }
}
