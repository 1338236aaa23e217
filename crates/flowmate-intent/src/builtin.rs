//! Built-in workflow templates.
//!
//! These are the multi-step business processes the assistant recognises out
//! of the box.  Trigger phrases and keywords are data: tune them here rather
//! than in the detector.

use crate::catalog::WorkflowCatalog;
use crate::error::Result;
use crate::template::{StepTemplate, TriggerSpec, WorkflowTemplate};

pub const MEETING_TO_TASKS: &str = "meeting-to-tasks";
pub const WEEKLY_REVIEW: &str = "weekly-review";
pub const EMAIL_FOLLOW_UP: &str = "email-follow-up";
pub const PROJECT_KICKOFF: &str = "project-kickoff";
pub const RESEARCH_AND_SHARE: &str = "research-and-share";

/// Every built-in template, in declaration order.
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        meeting_to_tasks(),
        weekly_review(),
        email_follow_up(),
        project_kickoff(),
        research_and_share(),
    ]
}

/// A catalog holding every built-in template.
pub fn builtin_catalog() -> Result<WorkflowCatalog> {
    WorkflowCatalog::from_templates(builtin_templates())
}

/// Transcript → proposed tasks → created tasks.
pub fn meeting_to_tasks() -> WorkflowTemplate {
    WorkflowTemplate::new(MEETING_TO_TASKS, "Meeting to Tasks")
        .with_description("Turn a meeting transcript into tracked tasks")
        .with_trigger(
            TriggerSpec::new()
                .phrases([
                    "meeting to tasks",
                    "tasks from the meeting",
                    "tasks from my meeting",
                    "action items from the meeting",
                    "turn the meeting into tasks",
                ])
                .keywords(["meeting", "transcript", "action", "tasks", "todo"])
                .domains(["meeting", "call", "standup"]),
        )
        .step(
            StepTemplate::new(
                "get_transcript",
                "Get meeting transcript",
                "meetings",
                "get_transcript",
            )
            .optional_param("date", "{{date}}")
            .optional_param("topic", "{{topic}}")
            .output("result", "transcript")
            .max_retries(2),
        )
        .step(
            StepTemplate::new(
                "propose_tasks",
                "Propose tasks",
                "assistant",
                "propose_tasks",
            )
            .param("transcript", "{{transcript}}")
            .depends_on("get_transcript")
            .output("tasks", "proposed_tasks")
            .max_retries(1),
        )
        .step(
            StepTemplate::new("create_tasks", "Create tasks", "tasks", "create_batch")
                .param("tasks", "{{proposed_tasks}}")
                .optional_param("assignee", "{{email}}")
                .depends_on("propose_tasks")
                .output("result", "created_tasks")
                .max_retries(2),
        )
}

/// Calendar and completed tasks, joined into a summary note.
pub fn weekly_review() -> WorkflowTemplate {
    WorkflowTemplate::new(WEEKLY_REVIEW, "Weekly Review")
        .with_description("Summarise this week's meetings and finished work")
        .with_trigger(
            TriggerSpec::new()
                .phrases([
                    "weekly review",
                    "review my week",
                    "week in review",
                    "weekly summary",
                ])
                .keywords(["week", "weekly", "review", "summary", "recap"])
                .domains(["week", "review", "planning"]),
        )
        .step(
            StepTemplate::new(
                "get_events",
                "Get calendar events",
                "calendar",
                "list_events",
            )
            .param("start", "{{week_start}}")
            .param("end", "{{week_end}}")
            .output("result", "events")
            .allow_empty_result()
            .max_retries(2),
        )
        .step(
            StepTemplate::new(
                "get_completed_tasks",
                "Get completed tasks",
                "tasks",
                "list_completed",
            )
            .param("since", "{{week_start}}")
            .output("result", "completed_tasks")
            .allow_empty_result()
            .max_retries(2),
        )
        .step(
            StepTemplate::new(
                "create_summary_note",
                "Create summary note",
                "notes",
                "create",
            )
            .param("title", "Weekly review {{week_start}}")
            .param(
                    "body",
                    "Meetings:\n{{events}}\n\nCompleted:\n{{completed_tasks}}",
                )
                .depends_on("get_events")
                .depends_on("get_completed_tasks")
                .output("url", "summary_url")
                .max_retries(1),
        )
}

/// Find the thread, draft a reply, send it, and set a reminder.
pub fn email_follow_up() -> WorkflowTemplate {
    WorkflowTemplate::new(EMAIL_FOLLOW_UP, "Email Follow-up")
        .with_description("Draft and send a follow-up to an email thread")
        .with_trigger(
            TriggerSpec::new()
                .phrases([
                    "follow up with",
                    "follow-up email",
                    "reply to",
                    "get back to",
                ])
                .keywords(["email", "reply", "follow", "respond", "mail"])
                .domains(["email", "mail", "inbox"]),
        )
        .default_param("tone", "friendly")
        .step(
            StepTemplate::new("search_mail", "Find the thread", "mail", "search")
                .param("from", "{{email}}")
                .optional_param("query", "{{query}}")
                .output("result", "thread")
                .max_retries(2),
        )
        .step(
            StepTemplate::new("draft_reply", "Draft reply", "assistant", "draft_reply")
                .param("thread", "{{thread}}")
                .optional_param("tone", "{{tone}}")
                .depends_on("search_mail")
                .output("subject", "reply_subject")
                .output("body", "reply_body")
                .max_retries(1),
        )
        .step(
            StepTemplate::new("send_reply", "Send reply", "mail", "send")
                .param("to", "{{email}}")
                .param("subject", "Re: {{reply_subject}}")
                .param("body", "{{reply_body}}")
                .depends_on("draft_reply")
                .max_retries(2),
        )
        .step(
            StepTemplate::new(
                "schedule_reminder",
                "Schedule reply reminder",
                "tasks",
                "create",
            )
            .param("title", "Check for a reply from {{email}}")
            .optional_param("due", "{{date}}")
            .depends_on("send_reply")
            .optional()
            .max_retries(1),
        )
}

/// Folder, plan, meeting and task list for a new project; invite attendees.
pub fn project_kickoff() -> WorkflowTemplate {
    WorkflowTemplate::new(PROJECT_KICKOFF, "Project Kickoff")
        .with_description("Set up the workspace and kickoff meeting for a project")
        .with_trigger(
            TriggerSpec::new()
                .phrases([
                    "kick off",
                    "kickoff meeting",
                    "start a new project",
                    "set up a project",
                ])
                .keywords(["project", "kickoff", "launch", "plan"])
                .domains(["project"]),
        )
        .step(
            StepTemplate::new(
                "create_folder",
                "Create project folder",
                "files",
                "create_folder",
            )
            .param("name", "{{topic}}")
            .output("id", "folder_id")
            .output("url", "folder_url")
            .max_retries(2),
        )
        .step(
            StepTemplate::new("create_plan_doc", "Write kickoff plan", "notes", "create")
                .param("title", "{{topic}} kickoff plan")
                .optional_param("folder", "{{folder_id}}")
                .depends_on("create_folder")
                .output("url", "plan_url")
                .max_retries(1),
        )
        .step(
            StepTemplate::new(
                "schedule_meeting",
                "Schedule kickoff meeting",
                "calendar",
                "create_event",
            )
            .param("title", "Kickoff: {{topic}}")
            .param("date", "{{date}}")
            .optional_param("attendees", "{{email_list}}")
            .output("id", "meeting_id")
            .max_retries(2),
        )
        .step(
            StepTemplate::new(
                "create_task_list",
                "Create task list",
                "tasks",
                "create_list",
            )
            .param("name", "{{topic}}")
            .output("id", "task_list_id")
            .max_retries(2),
        )
        .step(
            StepTemplate::new("send_invite", "Email the team", "mail", "send")
                .param("to", "{{email_list}}")
                .param("subject", "Kickoff: {{topic}}")
                .param("body", "Plan: {{plan_url}}\nMeeting on {{date}}")
                .depends_on("create_plan_doc")
                .depends_on("schedule_meeting")
                .optional()
                .max_retries(2),
        )
}

/// Search the intranet and drive, summarise, and mail the digest.
pub fn research_and_share() -> WorkflowTemplate {
    WorkflowTemplate::new(RESEARCH_AND_SHARE, "Research and Share")
        .with_description("Collect documents on a topic and send a digest")
        .with_trigger(
            TriggerSpec::new()
                .phrases([
                    "find and share",
                    "research and share",
                    "search and send",
                    "look up and send",
                ])
                .keywords(["find", "search", "share", "research", "documents"])
                .domains(["research", "document", "files"]),
        )
        .step(
            StepTemplate::new("search_site", "Search the intranet", "search", "query")
                .param("q", "{{query}}")
                .output("result", "search_results")
                .max_retries(2),
        )
        .step(
            StepTemplate::new("search_files", "Search files", "files", "search")
                .param("q", "{{query}}")
                .output("result", "file_results")
                .optional()
                .max_retries(1),
        )
        .step(
            StepTemplate::new("compose_digest", "Write digest", "assistant", "summarize")
                .param("text", "{{search_results}}\n{{file_results}}")
                .depends_on("search_site")
                .depends_on("search_files")
                .output("result", "digest")
                .max_retries(1),
        )
        .step(
            StepTemplate::new("share_digest", "Send digest", "mail", "send")
                .param("to", "{{email}}")
                .param("subject", "Digest: {{query}}")
                .param("body", "{{digest}}")
                .depends_on("compose_digest")
                .max_retries(2),
        )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
