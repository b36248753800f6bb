//! Prompt templates for the structured adapter calls.

/// System instruction prepended to every chat turn by the pipeline.
pub const CHAT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are an expert at summarising conversations \
clearly and concisely. Always respond in JSON format.";

pub const BRANCH_SYSTEM_PROMPT: &str = "You are a conversation analysis expert. \
Return only a JSON object, no explanations or extra text.";

/// Maximum branches a single analysis may propose.
pub const MAX_BRANCHES: usize = 3;

/// Build the user prompt for summarising a set of node contents.
pub fn summary_prompt(contents: &[String], instructions: Option<&str>) -> String {
    let sections: Vec<String> = contents
        .iter()
        .enumerate()
        .map(|(i, content)| format!("[Section {}]\n{}", i + 1, content))
        .collect();

    let mut prompt = match instructions {
        Some(instructions) => format!(
            "Summarise the conversation content of the {} sections below, \
             following these instructions: {}\n\n",
            contents.len(),
            instructions
        ),
        None => format!(
            "Summarise the conversation content of the {} sections below. \
             Identify the key topics and arguments of each section and \
             organise the overall flow so it is easy to follow.\n\n",
            contents.len()
        ),
    };
    prompt.push_str("Content:\n");
    prompt.push_str(&sections.join("\n"));
    prompt.push_str(
        "\n\nReturn a JSON object with exactly two fields:\n\
         1. title: a heading of at most 20 characters capturing the essence\n\
         2. summary: the comprehensive summary of the content",
    );
    prompt
}

/// Build the user prompt for branch analysis over a rendered conversation.
pub fn branch_prompt(conversation: &str) -> String {
    format!(
        "Analyse the conversation below and find topics worth exploring further.\n\n\
         Conversation:\n{conversation}\n\n\
         Criteria:\n\
         1. Related topics the user is likely to care about\n\
         2. Details that reward a deeper dive\n\
         3. Alternative approaches\n\
         4. Points that need follow-up questions\n\
         5. Places where a concrete example would help\n\n\
         Propose at most {MAX_BRANCHES} branches, and only genuinely specific, \
         worthwhile ones. If the exchange is trivial or already fully answered, \
         return an empty list.\n\n\
         Return a JSON object: {{\"recommended_branches\": [{{\"title\": string, \
         \"type\": \"topics\"|\"details\"|\"alternatives\"|\"questions\"|\"examples\", \
         \"description\": string, \"priority\": number 0-1, \
         \"estimated_depth\": integer 1-10}}]}}"
    )
}
