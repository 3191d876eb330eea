use runlib::errors::{AdmissionError, CODE_REQUIRED};
use runlib::types::{Envs, Job};
use serde::Deserialize;
use serde_json::Value;

/// Body of `POST /run`. Fields stay untyped so that a wrong type maps to
/// the same 400 as a missing field.
#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    env: Option<Value>,
}

pub fn parse_run_request(body: &[u8]) -> Result<Job, AdmissionError> {
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|err| AdmissionError::InvalidInput(format!("invalid JSON body: {err}")))?
    };

    let code = match request.code {
        Some(Value::String(code)) if !code.trim().is_empty() => code,
        _ => return Err(AdmissionError::InvalidInput(CODE_REQUIRED.into())),
    };

    // non-string values are kept in their JSON text form
    let environment: Envs = match request.env {
        Some(Value::Object(vars)) => vars
            .into_iter()
            .map(|(key, value)| match value {
                Value::String(value) => (key, value),
                other => (key, other.to_string()),
            })
            .collect(),
        _ => Envs::new(),
    };

    Ok(Job::new(code, environment))
}
