/// One tracked step of the content workflow: the n8n node that performs it,
/// its fixed position in the pipeline and the name shown to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDefinition {
    pub node_name: &'static str,
    pub order: i32,
    pub display_name: &'static str,
}

const fn stage(order: i32, node_name: &'static str, display_name: &'static str) -> StageDefinition {
    StageDefinition {
        node_name,
        order,
        display_name,
    }
}

pub const STAGE_CATALOG: [StageDefinition; 19] = [
    stage(1, "Webhook1", "Webhook Received"),
    stage(2, "Create folder1", "Google Drive Folder Created"),
    stage(3, "OpenAI Draft (GPT-4O)1", "OpenAI Draft Generated"),
    stage(4, "Claude Draft (Claude Opus 3)1", "Claude Draft Generated"),
    stage(5, "Data Check & Research Gaps1", "Data Check & Research Gaps"),
    stage(6, "OpenAI Keyword Check + Semantic Gap1", "OpenAI Keyword Analysis"),
    stage(7, "Claude Keyword Check + Semantic Gap1", "Claude Keyword Analysis"),
    stage(8, "Claude Apply Recommendations1", "Recommendations Applied"),
    stage(9, "OpenAI EEAT Injection1", "OpenAI EEAT Enhancement"),
    stage(10, "Claude EEAT Injection1", "Claude EEAT Enhancement"),
    stage(11, "Merge6", "EEAT Versions Merged"),
    stage(12, "OpenAI SEO Optimization1", "SEO Optimization"),
    stage(13, "OpenAI NLP & PR Optimization", "OpenAI NLP Optimization"),
    stage(14, "Claude NLP & PR Optimization", "Claude NLP Optimization"),
    stage(15, "Claude Final SEO Snippet Optimization", "Final SEO Snippet"),
    stage(16, "OpenAI Humanised Readability Rewrite", "Humanized Readability"),
    stage(17, "Document Export Sanitization", "Document Sanitization"),
    stage(18, "1st Scoring Agent2", "Quality Scoring"),
    stage(19, "Google Drive Notification1", "Final Document Created"),
];

pub const TOTAL_STAGES: i32 = STAGE_CATALOG.len() as i32;

/// Stage a freshly created run reports before the first poll lands.
pub const INITIAL_STAGE: &str = STAGE_CATALOG[0].display_name;

pub fn lookup(node_name: &str) -> Option<&'static StageDefinition> {
    STAGE_CATALOG.iter().find(|s| s.node_name == node_name)
}
