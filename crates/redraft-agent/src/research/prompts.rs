use redraft_core::types::ChatMessage;

const PLANNER_ROLE: &str = "You are a Research Planner. Given a topic, create a concise \
step-by-step research plan. Focus on 3-5 key areas to investigate.";

const RESEARCHER_ROLE: &str = "You are a Research Specialist. You execute research plans and \
report detailed, factual findings for every point.";

const WRITER_ROLE: &str = "You are a Senior Technical Writer. You turn research notes into \
comprehensive, well-structured reports.";

const REVIEWER_ROLE: &str = "You are an Editor in Chief. You review drafts for clarity, depth, \
and structure.";

const REVISER_ROLE: &str = "You are a Senior Writer. You revise drafts based on an editor's \
critique.";

pub fn planner(task: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(PLANNER_ROLE), ChatMessage::user(task)]
}

pub fn researcher(plan: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"Execute the following research plan:
{}

For each point, provide detailed, factual information.
If you were using a search engine, you would look for recent data.
Use your own knowledge to provide the most accurate and comprehensive information you have."#,
        plan
    );
    vec![ChatMessage::system(RESEARCHER_ROLE), ChatMessage::user(prompt)]
}

/// Earlier research notes are joined with blank lines, oldest first.
pub fn writer(task: &str, content: &[&str]) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"Write a comprehensive report based on the following research:

{}

The report should be well-structured with headers, bullet points, and a clear conclusion.
Topic: {}"#,
        content.join("\n\n"),
        task
    );
    vec![ChatMessage::system(WRITER_ROLE), ChatMessage::user(prompt)]
}

pub fn reviewer(draft: &str, marker: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"Review the following draft for clarity, depth, and structure.

Draft:
{}

Provide a critique. If the draft is excellent, say "{}".
If it needs work, list specific improvements needed."#,
        draft, marker
    );
    vec![ChatMessage::system(REVIEWER_ROLE), ChatMessage::user(prompt)]
}

pub fn reviser(draft: &str, critique: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        r#"Revise your draft based on the editor's critique.

Original Draft:
{}

Critique:
{}

Return the polished final version."#,
        draft, critique
    );
    vec![ChatMessage::system(REVISER_ROLE), ChatMessage::user(prompt)]
}
