//! Prompt builder for scrum-master sessions
//!
//! The prompt is the only channel through which a bead's identity and intent
//! reach the agent, so it must be deterministic for a given bead.

use ralph_core::Bead;

/// Build the initial prompt for a scrum-master session
pub fn build_scrum_master_prompt(bead: &Bead) -> String {
    let meta = &bead.metadata;
    let mut prompt = String::new();

    // Work item identity
    prompt.push_str(&format!("Execute Sprint: {}\n\n", bead.title));
    prompt.push_str(&format!("**Bead ID**: {}\n", bead.id));
    prompt.push_str(&format!("**Team**: {}\n", bead.team()));
    prompt.push_str(&format!("**Worktree**: {}\n", meta.worktree_path));
    prompt.push_str(&format!("**Branch**: {}\n", meta.branch));
    prompt.push_str(&format!("**Source Branch**: {}\n\n", meta.source_branch));

    if !bead.description.is_empty() {
        prompt.push_str("**Description**:\n");
        prompt.push_str(&bead.description);
        prompt.push_str("\n\n");
    }

    if !meta.plan_file.is_empty() {
        prompt.push_str(&format!("**Plan Reference**: {}", meta.plan_file));
        if !meta.plan_section.is_empty() {
            prompt.push_str(&format!(" ({})", meta.plan_section));
        }
        prompt.push_str("\n\n");
    }

    // Result protocol
    prompt.push_str("**CRITICAL**: You must return fenced JSON output with ScrumResult:\n\n");
    prompt.push_str("```json\n");
    prompt.push_str("{\n");
    prompt.push_str(&format!("  \"bead_id\": \"{}\",\n", bead.id));
    prompt.push_str("  \"success\": true,\n");
    prompt.push_str("  \"pr_url\": \"https://github.com/user/repo/pull/42\",\n");
    prompt.push_str("  \"pr_number\": 42,\n");
    prompt.push_str("  \"bead_updated\": true,\n");
    prompt.push_str("  \"error\": null\n");
    prompt.push_str("}\n");
    prompt.push_str("```\n");

    prompt
}
