// Shared prompt fragments.
// Stage-specific templates live in analysis::prompts.

/// System instruction sent with every generation request.
pub const JSON_ONLY_SYSTEM: &str = "You are a professional resume analyst. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON value. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Closing instruction appended to every stage prompt.
pub const JSON_ONLY_INSTRUCTION: &str = "\
    Return ONLY the JSON in the exact shape shown above. \
    No prose before or after it, no markdown code fences, no comments.";
