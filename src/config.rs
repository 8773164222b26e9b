// IMPORTANT:
// Keep ALL numeric values and fixed strings centralized here (no magic numbers scattered around).

// NOTE: HOST_VERSION must stay in sync with the `version` field in Cargo.toml.
pub const HOST_VERSION: &str = "0.3.0";

pub mod logging {
    pub const LOG_DIR_REL: &str = ".mailvec/logs";
    pub const LOG_FILE_NAME: &str = "mailvec.log";

    pub const LOG_ROTATE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
    pub const LOG_ROTATE_KEEP_FILES: usize = 5;

    // Subjects and ids are cut to this many chars in log lines.
    pub const LOG_TRUNCATE_CHARS: usize = 80;
}

pub mod http {
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 90;
}

pub mod embedding {
    pub const EMBEDDING_DIMS: usize = 384;
    pub const EMBEDDING_MODEL_NAME: &str = "all-MiniLM-L6-v2";

    // Max word-piece tokens for all-MiniLM-L6-v2 (model context limit is 256).
    pub const MAX_TOKENS: usize = 256;

    // Word budget for subject + body before tokenization. Word-piece expands ~1.3x.
    pub const MAX_INPUT_WORDS: usize = 180;

    // Model download URL base (lazy download on first use).
    pub const MODEL_BASE_URL: &str =
        "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

    // SHA256 of the pinned weights file.
    pub const MODEL_SAFETENSORS_SHA256: &str =
        "53aa51172d142c89d9012cce15ae4d6cc0ca6895895114379cacb4fab128d9db";

    // Local model storage directory (relative to home)
    pub const MODEL_DIR_REL: &str = ".mailvec/models/all-MiniLM-L6-v2";
}

pub mod similarity {
    // Inclusive: a score equal to the threshold counts as a near-duplicate.
    pub const DEFAULT_THRESHOLD: f64 = 0.7;
}

pub mod gmail {
    pub const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
    pub const DEFAULT_QUERY: &str = "subject:(SQL)";
    pub const DEFAULT_TOKEN_FILE: &str = "token.json";
    pub const LIST_PAGE_SIZE: u32 = 100;
}

pub mod notion {
    pub const API_BASE: &str = "https://api.notion.com/v1";
    pub const API_VERSION: &str = "2022-06-28";
    pub const QUERY_PAGE_SIZE: u32 = 100;

    // Notion rejects rich_text segments longer than this.
    pub const RICH_TEXT_SEGMENT_CHARS: usize = 2000;
    // ...and properties with more segments than this.
    pub const RICH_TEXT_MAX_SEGMENTS: usize = 100;

    pub const PROP_SUBJECT: &str = "Subject";
    pub const PROP_FROM: &str = "From";
    pub const PROP_DATE: &str = "Date";
    pub const PROP_CONTENT: &str = "Content";
    pub const PROP_VECTOR: &str = "Vector";
    pub const PROP_MESSAGE_ID: &str = "Message ID";
    pub const PROP_VECTORIZED_AT: &str = "Vectorized At";
}
