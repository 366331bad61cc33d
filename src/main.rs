use std::path::Path;
use std::sync::Arc;

use facets::attachments::AttachmentManager;
use facets::cache::{OfflineCache, RecordKind};
use facets::config::{self, AppConfig, AppConfigOverrides};
use facets::logging;
use facets::metrics::Metrics;
use facets::models::{CustomField, Project, Query};
use facets::render::{render_issue_detail, render_issue_row, render_project_row};
use facets::session::AppState;
use facets::sort::{available_sort_fields, AssigneeFilter, IssueFilter, StatusFilter};
use facets::view_model::{
    IssueListViewModel, ProjectIssueListViewModel, QueryIssueListViewModel, ViewModelError,
};
use facets::warmup::seed_metadata;

const USAGE: &str = "usage: facets <login|logout|projects|issues|fields|show|delete|download|warmup> [options]
  projects [--refresh]
  issues [--project ID] [--query ID] [--sort FIELD] [--asc|--desc] [--pages N] [--status open|closed|all|ID] [--tracker ID] [--mine]
  show ISSUE_ID
  delete ISSUE_ID
  download ISSUE_ID
  warmup";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn parse_id(raw: Option<&str>, what: &str) -> CliResult<i64> {
    let raw = raw.ok_or_else(|| format!("missing {what}\n{USAGE}"))?;
    raw.parse::<i64>()
        .map_err(|_| format!("invalid {what} '{raw}'").into())
}

fn optional_id(args: &[String], name: &str) -> CliResult<Option<i64>> {
    flag_value(args, name)
        .map(|raw| parse_id(Some(raw), name))
        .transpose()
}

fn open_cache(cfg: &AppConfig, metrics: Arc<Metrics>) -> CliResult<Option<OfflineCache>> {
    if !cfg.cache.enabled() {
        logging::info("offline cache disabled");
        return Ok(None);
    }
    logging::info(format!("offline cache enabled at {}", cfg.cache.db_path));
    Ok(Some(OfflineCache::open(Path::new(&cfg.cache.db_path), metrics)?))
}

fn main() -> CliResult<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        return Err(USAGE.into());
    };

    let mut cfg = config::load()?;
    cfg.apply_overrides(&AppConfigOverrides::from_env())?;
    if cfg.logging.debug {
        logging::enable_debug();
    }

    let mut state = AppState::shared()
        .write()
        .map_err(|_| "app state lock poisoned")?;
    state.set_attachment_manager(AttachmentManager::new(&cfg.attachments.download_dir));

    if command.as_str() == "logout" {
        if let Some(cache) = open_cache(&cfg, state.metrics())? {
            cache.clear()?;
            logging::info("offline cache cleared");
        }
        state.logout();
        println!("logged out");
        return Ok(());
    }

    let user = state.login(&cfg.server.base_url, cfg.server.credentials())?;
    let cache = open_cache(&cfg, state.metrics())?;

    match command.as_str() {
        "login" => {
            println!("{} <{}> (id {})", user.name, user.login, user.index);
            if let Some(last) = user.last_login_at() {
                println!("last login {}", last.to_rfc2822());
            }
        }
        "projects" => {
            let projects = match (&cache, has_flag(rest, "--refresh")) {
                (Some(cache), false) => {
                    let cached: Vec<Project> = cache.load(RecordKind::Projects)?;
                    if cached.is_empty() {
                        state.refresh_projects()?.to_vec()
                    } else {
                        cached
                    }
                }
                (Some(cache), true) => {
                    let client = state.server_sync()?;
                    cache.refresh_stale_safe(RecordKind::Projects, || {
                        client.list_projects().map_err(ViewModelError::from)
                    })?
                }
                (None, _) => state.refresh_projects()?.to_vec(),
            };
            state.set_projects(projects);
            let selected = state.current_project_id();
            for project in state.projects() {
                println!("{}", render_project_row(project, Some(project.id) == selected));
            }
        }
        "issues" => {
            if state.projects().is_empty() {
                state.refresh_projects()?;
            }
            if let Some(project_id) = optional_id(rest, "--project")? {
                state.set_current_project_id(Some(project_id));
            }

            let mut vm: Box<dyn IssueListViewModel> = match optional_id(rest, "--query")? {
                Some(query_id) => {
                    let client = state.server_sync()?;
                    let query: Query = client
                        .list_queries()?
                        .into_iter()
                        .find(|q| q.id == query_id)
                        .ok_or_else(|| format!("no saved query with id {query_id}"))?;
                    Box::new(
                        QueryIssueListViewModel::new(client, query)
                            .with_page_size(cfg.issues.page_size),
                    )
                }
                None => {
                    let status = match flag_value(rest, "--status") {
                        Some(raw) => StatusFilter::parse(raw)
                            .ok_or_else(|| format!("invalid status filter '{raw}'"))?,
                        None => StatusFilter::default(),
                    };
                    let mut list = ProjectIssueListViewModel::for_current_project(&state)?
                        .with_page_size(cfg.issues.page_size);
                    if let Some(cache) = cache {
                        list = list.with_cache(cache)?;
                    }
                    list.set_filter(IssueFilter {
                        status,
                        tracker_id: optional_id(rest, "--tracker")?,
                        assignee: has_flag(rest, "--mine").then_some(AssigneeFilter::Me),
                    });
                    Box::new(list)
                }
            };

            let sort_field = flag_value(rest, "--sort").unwrap_or(&cfg.issues.sort_field);
            let ascending = if has_flag(rest, "--asc") {
                true
            } else if has_flag(rest, "--desc") {
                false
            } else {
                cfg.issues.ascending
            };
            let pages = flag_value(rest, "--pages")
                .map(str::parse::<usize>)
                .transpose()
                .map_err(|_| "invalid --pages value")?
                .unwrap_or(1)
                .max(1);

            vm.load_issues_sorted_by(sort_field, ascending)?;
            for _ in 1..pages {
                if !vm.more_issues_available() {
                    break;
                }
                vm.load_more_issues()?;
            }

            println!("{}", vm.title());
            for issue in vm.issues() {
                println!("{}", render_issue_row(issue));
            }
            if vm.more_issues_available() {
                println!("(more issues available; use --pages)");
            }
        }
        "fields" => {
            let custom_fields: Vec<CustomField> = match &cache {
                Some(cache) => cache.load(RecordKind::CustomFields)?,
                None => Vec::new(),
            };
            for field in available_sort_fields(&custom_fields) {
                println!("{:<18} {}", field.server_name, field.display_name);
            }
        }
        "show" => {
            let id = parse_id(rest.first().map(String::as_str), "ISSUE_ID")?;
            let issue = state.server_sync()?.issue(id)?;
            print!("{}", render_issue_detail(&issue));
        }
        "delete" => {
            let id = parse_id(rest.first().map(String::as_str), "ISSUE_ID")?;
            state.server_sync()?.delete_issue(id)?;
            println!("deleted #{id}");
        }
        "download" => {
            let id = parse_id(rest.first().map(String::as_str), "ISSUE_ID")?;
            let client = state.server_sync()?;
            let issue = client.issue(id)?;
            if issue.attachments.is_empty() {
                println!("#{id} has no attachments");
            }
            for attachment in &issue.attachments {
                let path = state.attachment_manager().fetch(&client, attachment)?;
                println!("{}", path.display());
            }
        }
        "warmup" => {
            let cache = cache.ok_or("warmup needs cache.db_path to be configured")?;
            let result = seed_metadata(&state.server_sync()?, &cache);
            logging::info(format!(
                "warmup refreshed {} kinds ({} records), {} errors",
                result.kinds_refreshed,
                result.records_cached,
                result.errors.len()
            ));
            if !result.errors.is_empty() {
                for err in &result.errors {
                    logging::error(err);
                }
                return Err("warmup finished with errors".into());
            }
        }
        other => return Err(format!("unknown command '{other}'\n{USAGE}").into()),
    }

    logging::debug(format!("metrics {}", state.metrics().snapshot()));
    Ok(())
}
