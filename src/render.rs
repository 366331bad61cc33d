use crate::models::{Issue, Project};

/// One-line summary in the shape of an issue list row.
pub fn render_issue_row(issue: &Issue) -> String {
    let assignee = issue
        .assigned_to
        .as_ref()
        .map(|a| a.name.as_str())
        .unwrap_or("Unassigned");
    let due = issue
        .due()
        .map(|d| d.format("%b %-d, %Y").to_string())
        .unwrap_or_else(|| "no due date".to_string());
    format!(
        "#{:<6} [{}] [{}] {} ({}, {})",
        issue.id, issue.status.name, issue.priority.name, issue.subject, assignee, due
    )
}

pub fn render_project_row(project: &Project, selected: bool) -> String {
    let marker = if selected { "*" } else { " " };
    match &project.parent {
        Some(parent) => format!(
            "{} {:<6} {} ({}) < {}",
            marker, project.id, project.name, project.identifier, parent.name
        ),
        None => format!(
            "{} {:<6} {} ({})",
            marker, project.id, project.name, project.identifier
        ),
    }
}

pub fn render_issue_detail(issue: &Issue) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# {} #{} - {}\n\n",
        issue.tracker.name, issue.id, issue.subject
    ));
    out.push_str(&format!("- Project: {}\n", issue.project.name));
    out.push_str(&format!("- Status: {}\n", issue.status.name));
    out.push_str(&format!("- Priority: {}\n", issue.priority.name));
    out.push_str(&format!("- Author: {}\n", issue.author.name));
    out.push_str(&format!(
        "- Assignee: {}\n",
        issue
            .assigned_to
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("Unassigned")
    ));
    if let Some(category) = &issue.category {
        out.push_str(&format!("- Category: {}\n", category.name));
    }
    out.push_str(&format!("- Done: {}%\n", issue.done_ratio));
    if let Some(hours) = issue.estimated_hours {
        out.push_str(&format!("- Estimated: {hours}h\n"));
    }
    if let Some(due) = issue.due() {
        out.push_str(&format!("- Due: {}\n", due.format("%Y-%m-%d")));
    }

    out.push_str("\n## Description\n\n");
    if issue.description.trim().is_empty() {
        out.push_str("(no description)\n");
    } else {
        out.push_str(issue.description.trim());
        out.push('\n');
    }

    if !issue.attachments.is_empty() {
        out.push_str("\n## Attachments\n\n");
        for attachment in &issue.attachments {
            out.push_str(&format!(
                "- {} ({} bytes)\n",
                attachment.filename, attachment.filesize
            ));
        }
    }

    out
}
