//! Server-rendered HTML for the dashboard and the log viewer.
//!
//! Pages are assembled with `format!`/`push_str`. Every value that came from the
//! supervisor or a log file passes through [`escape_html`] first.

use std::fmt::Write as _;

use crate::logs::{LogFileDescriptor, LINE_CHOICES};
use crate::process::ProcessRecord;

const STYLE: &str = r#"
body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; margin: 0; padding: 20px; background: #f5f5f5; color: #333; }
.container { max-width: 1200px; margin: 0 auto; }
h1 { margin-top: 0; }
.btn { padding: 8px 16px; border: none; border-radius: 4px; cursor: pointer; text-decoration: none; font-size: 14px; }
.btn-primary { background: #007bff; color: #fff; }
.btn-secondary { background: #6c757d; color: #fff; }
.process-grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(340px, 1fr)); gap: 20px; margin-top: 20px; }
.process-card { background: #fff; border-radius: 8px; padding: 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
.process-card.loading { opacity: 0.6; pointer-events: none; }
.process-name { font-size: 18px; font-weight: bold; margin-bottom: 10px; }
.process-info { font-size: 14px; color: #666; margin-bottom: 15px; }
.process-dir { font-size: 12px; color: #888; margin-top: 5px; word-break: break-all; }
.status { padding: 2px 8px; border-radius: 4px; font-size: 12px; font-weight: bold; }
.status.online { background: #d4edda; color: #155724; }
.status.stopped { background: #f8d7da; color: #721c24; }
.status.errored { background: #f8d7da; color: #721c24; }
.status.unknown, .status.launching, .status.stopping { background: #fff3cd; color: #856404; }
.log-links { display: flex; gap: 10px; margin-bottom: 15px; }
.log-link { padding: 6px 12px; border-radius: 4px; text-decoration: none; font-size: 13px; color: #fff; }
.log-link.out { background: #28a745; }
.log-link.error { background: #dc3545; }
.no-logs { color: #999; font-style: italic; font-size: 13px; }
.process-controls { display: flex; flex-wrap: wrap; gap: 8px; }
.control-btn { padding: 6px 12px; border: none; border-radius: 4px; cursor: pointer; font-size: 13px; color: #fff; background: #6c757d; }
.control-btn:disabled { opacity: 0.4; cursor: not-allowed; }
.btn-start { background: #28a745; }
.btn-stop { background: #dc3545; }
.btn-restart { background: #ffc107; color: #333; }
.btn-git-pull { background: #6f42c1; }
.btn-npm-install { background: #17a2b8; }
.btn-npm-build { background: #fd7e14; }
.btn-npm-deploy { background: #20c997; }
.message { display: none; width: 100%; margin-top: 10px; padding: 8px; border-radius: 4px; font-size: 13px; white-space: pre-wrap; max-height: 240px; overflow: auto; }
.message.success { background: #d4edda; color: #155724; }
.message.error { background: #f8d7da; color: #721c24; }
.header { display: flex; justify-content: space-between; align-items: center; flex-wrap: wrap; gap: 10px; }
.controls { display: flex; gap: 10px; align-items: center; }
.log-info { background: #fff; padding: 10px 15px; border-radius: 4px; margin: 15px 0; font-size: 14px; word-break: break-all; }
.log-content { background: #1e1e1e; color: #d4d4d4; padding: 15px; border-radius: 4px; font-family: Menlo, Consolas, monospace; font-size: 13px; white-space: pre-wrap; word-break: break-all; max-height: 75vh; overflow-y: auto; }
.empty-log { color: #888; font-style: italic; }
"#;

const DASHBOARD_SCRIPT: &str = r#"
const ENDPOINTS = {
  'start': name => `/api/processes/${encodeURIComponent(name)}/start`,
  'stop': name => `/api/processes/${encodeURIComponent(name)}/stop`,
  'restart': name => `/api/processes/${encodeURIComponent(name)}/restart`,
  'git-pull': name => `/api/git-pull/${encodeURIComponent(name)}`,
  'npm-install': name => `/api/npm-install/${encodeURIComponent(name)}`,
  'npm-build': name => `/api/npm-build/${encodeURIComponent(name)}`,
  'npm-deploy': name => `/api/npm-deploy/${encodeURIComponent(name)}`,
};

function show(el, text) {
  el.textContent = text;
  el.style.display = 'block';
}

async function runAction(button) {
  const card = button.closest('.process-card');
  const name = card.dataset.process;
  const action = button.dataset.action;
  const success = card.querySelector('.message.success');
  const failure = card.querySelector('.message.error');
  const buttons = card.querySelectorAll('.control-btn');
  const states = Array.from(buttons, b => b.disabled);

  success.style.display = 'none';
  failure.style.display = 'none';
  card.classList.add('loading');
  buttons.forEach(b => b.disabled = true);

  try {
    const response = await fetch(ENDPOINTS[action](name), {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
    });
    const result = await response.json();
    if (response.ok && result.success) {
      show(success, [result.message, result.output].filter(Boolean).join('\n\n'));
      if (['start', 'stop', 'restart'].includes(action)) {
        setTimeout(() => window.location.reload(), 1500);
        return;
      }
    } else {
      const detail = [result.stderr, result.output, result.details].filter(Boolean).join('\n\n');
      show(failure, `Error: ${result.error || 'Unknown error occurred'}` + (detail ? `\n\n${detail}` : ''));
    }
  } catch (error) {
    show(failure, `Error: ${error.message}`);
  }
  card.classList.remove('loading');
  buttons.forEach((b, i) => b.disabled = states[i]);
}

document.querySelectorAll('.control-btn').forEach(button => {
  button.addEventListener('click', () => runAction(button));
});
"#;

const LOG_SCRIPT: &str = r#"
document.getElementById('linesSelect').addEventListener('change', event => {
  const url = new URL(window.location);
  url.searchParams.set('lines', event.target.value);
  window.location.href = url.toString();
});
const content = document.getElementById('logContent');
content.scrollTop = content.scrollHeight;
setInterval(() => window.location.reload(), 10000);
"#;

/// Escapes text for use in element content and quoted attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Percent-encodes a single URL path segment.
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => {
                let _ = write!(encoded, "%{:02X}", other);
            }
        }
    }
    encoded
}

fn page(title: &str, body: &str, script: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}\n<script>{}</script>\n</body>\n</html>\n",
        escape_html(title),
        STYLE,
        body,
        script
    )
}

/// The process dashboard: one card per process with its log links and action buttons.
pub fn render_dashboard(processes: &[(ProcessRecord, Vec<LogFileDescriptor>)]) -> String {
    let mut body = String::new();
    body.push_str("<div class=\"container\">\n<div class=\"header\">\n<h1>PM2 Dashboard</h1>\n");
    body.push_str(
        "<button class=\"btn btn-primary\" onclick=\"window.location.reload()\">Refresh</button>\n</div>\n",
    );

    if processes.is_empty() {
        body.push_str("<p class=\"no-logs\">No processes are registered with PM2.</p>\n");
    } else {
        body.push_str("<div class=\"process-grid\">\n");
        for (record, logs) in processes {
            render_card(&mut body, record, logs);
        }
        body.push_str("</div>\n");
    }
    body.push_str("</div>");
    page("PM2 Dashboard", &body, DASHBOARD_SCRIPT)
}

fn render_card(body: &mut String, record: &ProcessRecord, logs: &[LogFileDescriptor]) {
    let name = escape_html(&record.name);
    let status = record.status.as_str();
    let online = record.status.is_online();
    let dir = record
        .working_directory
        .as_ref()
        .map(|dir| escape_html(&dir.display().to_string()))
        .unwrap_or_else(|| "(none)".to_string());

    let _ = write!(
        body,
        "<div class=\"process-card\" data-process=\"{name}\">\n\
         <div class=\"process-name\">{name}</div>\n\
         <div class=\"process-info\">\n\
         <div>ID: {id}</div>\n\
         <div>Status: <span class=\"status {status_class}\">{status}</span></div>\n\
         <div>Restarts: {restarts}</div>\n\
         <div>CPU: {cpu}%</div>\n\
         <div>Memory: {memory}MB</div>\n\
         <div class=\"process-dir\">Dir: {dir}</div>\n\
         </div>\n",
        name = name,
        id = record.id,
        status_class = status.replace(' ', "-"),
        status = escape_html(status),
        restarts = record.restart_count,
        cpu = record.cpu_percent,
        memory = record.memory_mb(),
        dir = dir,
    );

    body.push_str("<div class=\"log-links\">\n");
    if logs.is_empty() {
        body.push_str("<span class=\"no-logs\">No log files found</span>\n");
    }
    for log in logs {
        let kind = log.kind.as_str();
        let _ = writeln!(
            body,
            "<a href=\"/logs/{}/{}\" class=\"log-link {}\">{} Log</a>",
            encode_segment(&record.name),
            kind,
            kind,
            kind.to_uppercase()
        );
    }
    body.push_str("</div>\n<div class=\"process-controls\">\n");

    let disabled = |off: bool| if off { " disabled" } else { "" };
    let buttons = [
        ("start", "Start", disabled(online)),
        ("stop", "Stop", disabled(!online)),
        ("restart", "Restart", disabled(!online)),
        ("git-pull", "Git Pull", ""),
        ("npm-install", "NPM Install", ""),
        ("npm-build", "NPM Build", ""),
        ("npm-deploy", "NPM Deploy", ""),
    ];
    for (action, label, state) in buttons {
        let _ = writeln!(
            body,
            "<button class=\"control-btn btn-{action}\" data-action=\"{action}\"{state}>{label}</button>",
            action = action,
            state = state,
            label = label
        );
    }
    body.push_str(
        "<div class=\"message success\"></div>\n<div class=\"message error\"></div>\n</div>\n</div>\n",
    );
}

/// The log viewer for one file.
pub fn render_log(log: &LogFileDescriptor, lines: usize, content: &str) -> String {
    let title = format!("{} - PM2 Dashboard", log.file_name);
    let mut body = String::new();
    let _ = write!(
        body,
        "<div class=\"container\">\n<div class=\"header\">\n<h1>{}</h1>\n<div class=\"controls\">\n\
         <select id=\"linesSelect\">\n",
        escape_html(&log.file_name)
    );
    for choice in LINE_CHOICES {
        let selected = if choice == lines { " selected" } else { "" };
        let _ = writeln!(
            body,
            "<option value=\"{choice}\"{selected}>{choice} lines</option>",
            choice = choice,
            selected = selected
        );
    }
    body.push_str(
        "</select>\n\
         <button class=\"btn btn-primary\" onclick=\"window.location.reload()\">Refresh</button>\n\
         <a href=\"/\" class=\"btn btn-secondary\">Back to Processes</a>\n\
         </div>\n</div>\n",
    );
    let _ = write!(
        body,
        "<div class=\"log-info\"><strong>Process:</strong> {} | <strong>Log Type:</strong> {} | \
         <strong>Showing:</strong> Last {} lines | <strong>File:</strong> {}</div>\n",
        escape_html(&log.process_name),
        log.kind.as_str().to_uppercase(),
        lines,
        escape_html(&log.path.display().to_string())
    );

    body.push_str("<div class=\"log-content\" id=\"logContent\">");
    if content.trim().is_empty() {
        body.push_str("<div class=\"empty-log\">Log file is empty or not found</div>");
    } else {
        body.push_str(&escape_html(content));
    }
    body.push_str("</div>\n</div>");
    page(&title, &body, LOG_SCRIPT)
}
