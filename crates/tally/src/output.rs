use libtally_core::TallyError;
use serde::Serialize;
use crate::cli::Cli;

/// Version of the JSON envelope below
pub const JSON_SCHEMA_VERSION: u32 = 1;

/// JSON response envelope
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub schema_version: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
}

#[derive(Serialize)]
pub struct JsonError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Output a successful result (JSON mode only; human output goes through
/// [`print_human`])
pub fn output_success<T: Serialize>(cli: &Cli, data: T) {
    if cli.json {
        let response = JsonResponse {
            schema_version: JSON_SCHEMA_VERSION,
            ok: true,
            data: Some(data),
            error: None,
        };
        print_json(&response, false);
    }
}

/// Output an error
pub fn output_error(cli: &Cli, err: &TallyError) {
    if cli.json {
        let suggestions = err.suggestions();
        let details = if suggestions.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!({ "suggestions": suggestions })
        };

        let response: JsonResponse<()> = JsonResponse {
            schema_version: JSON_SCHEMA_VERSION,
            ok: false,
            data: None,
            error: Some(JsonError {
                code: err.error_code().to_string(),
                message: err.to_string(),
                details,
            }),
        };
        print_json(&response, true);
    } else {
        eprintln!("error: {}", err);
        let suggestions = err.suggestions();
        if !suggestions.is_empty() {
            eprintln!();
            eprintln!("Suggestions:");
            for suggestion in suggestions {
                eprintln!("  - {}", suggestion);
            }
        }
    }
}

/// Print human-readable output (ignored in quiet and JSON mode)
pub fn print_human(cli: &Cli, msg: &str) {
    if !cli.json && !cli.quiet {
        println!("{}", msg);
    }
}

/// One compact JSON value per line, for streaming output
pub fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => eprintln!("error: failed to encode output: {}", e),
    }
}

fn print_json<T: Serialize>(value: &T, to_stderr: bool) {
    match serde_json::to_string_pretty(value) {
        Ok(text) if to_stderr => eprintln!("{}", text),
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("error: failed to encode output: {}", e),
    }
}
