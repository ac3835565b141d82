//! Small utility helpers used across modules.

use std::path::Path;

use serde::Serialize;

use crate::error::StoreError;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values in a single
/// pass: substituted values are never scanned again, unknown `{...}` stays as is.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let value = after
      .find('}')
      .and_then(|close| pairs.iter().find(|(k, _)| *k == &after[..close]).map(|(_, v)| (close, *v)));
    match value {
      Some((close, v)) => {
        out.push_str(v);
        rest = &after[close + 1..];
      }
      None => {
        out.push('{');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Strip an optional Markdown code fence around model output.
/// "```json\n{...}\n```" and "```\n{...}```" both become "{...}"; unfenced text is only trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
  let s = raw.trim();
  let Some(rest) = s.strip_prefix("```") else { return s };
  // Drop the info string ("json", "JSON", ...) up to the first line break.
  let body = match rest.find('\n') {
    Some(i) if rest[..i].chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') => &rest[i + 1..],
    _ => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
  };
  body.trim().strip_suffix("```").unwrap_or(body).trim()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

/// Serialize to pretty JSON and replace `path` via a temp file + rename.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      tokio::fs::create_dir_all(parent).await?;
    }
  }
  let body = serde_json::to_vec_pretty(value)?;
  let tmp = path.with_extension("json.tmp");
  tokio::fs::write(&tmp, body).await?;
  tokio::fs::rename(&tmp, path).await?;
  Ok(())
}
