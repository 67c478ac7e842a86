//! Best-effort title generation (§4.11). Never allowed to fail the run:
//! any error from the Chairman model is swallowed into `None`.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::model_client::ModelClient;
use crate::roles::Role;

const MAX_TITLE_CHARS: usize = 60;
const TITLE_SYSTEM_PROMPT: &str =
    "Write a short, descriptive title (6 words or fewer) for the following request. \
     Reply with the title text only, no quotes or punctuation at the end.";

pub async fn generate_title(
    client: Arc<dyn ModelClient>,
    chairman_model_id: &str,
    prompt: &str,
    deadline: Duration,
) -> Option<String> {
    match client
        .complete(chairman_model_id, TITLE_SYSTEM_PROMPT, prompt, deadline)
        .await
    {
        Ok(text) => Some(truncate_title(&text)),
        Err(err) => {
            warn!(model_id = chairman_model_id, error = %err, "title generation failed, omitting title");
            None
        }
    }
}

fn truncate_title(text: &str) -> String {
    let trimmed = text.trim();
    let _ = Role::Chairman; // title piggybacks on the Chairman model, not a distinct role prompt
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_TITLE_CHARS).collect()
    }
}
