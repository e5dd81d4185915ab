//! Server-rendered HTML pages.
//!
//! All user-supplied values pass through [`escape_html`]; only the model
//! answer, already rendered from markdown, is inserted as markup.

use crate::markdown::escape_html;

/// What the assistant page shows.
#[derive(Debug, Default, Clone)]
pub struct AssistantView {
    pub department: String,
    pub prompt: Option<String>,
    pub error: Option<String>,
    /// Answer rendered as HTML.
    pub response_html: Option<String>,
    /// Answer as plain text, for the read-aloud controls.
    pub response_text: Option<String>,
    pub show_content: bool,
}

impl AssistantView {
    pub fn empty(department: &str) -> Self {
        Self {
            department: department.to_string(),
            ..Self::default()
        }
    }

    pub fn error(department: &str, prompt: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            department: department.to_string(),
            prompt: prompt.map(str::to_string),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 52rem; margin: 2rem auto; padding: 0 1rem; color: #222; }
nav a { margin-right: 1rem; }
.error { background: #fde8e8; border: 1px solid #e0a0a0; padding: .75rem; border-radius: 4px; }
.response { background: #f6f8fa; padding: 1rem; border-radius: 4px; }
textarea { width: 100%; min-height: 6rem; }
ul.departments li { margin: .25rem 0; }
"#;

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>{STYLE}</style>
</head>
<body>
<nav><a href="/">Home</a><a href="/departments">Departments</a></nav>
{body}
</body>
</html>
"#,
        title = escape_html(title),
    )
}

pub fn welcome() -> String {
    layout(
        "PDF Assistant",
        r#"<h1>PDF Assistant</h1>
<p>Upload a PDF, ask a question about it, and get an answer grounded in the document.</p>
<p><a href="/departments">Choose a department to begin</a></p>"#,
    )
}

pub fn departments(departments: &[String]) -> String {
    let items: String = departments
        .iter()
        .map(|d| {
            format!(
                r#"<li><a href="/ai_assistant?department={}">{}</a></li>"#,
                escape_html(&encode_query_value(d)),
                escape_html(d)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    layout(
        "Departments",
        &format!("<h1>Departments</h1>\n<ul class=\"departments\">\n{items}\n</ul>"),
    )
}

pub fn assistant(view: &AssistantView) -> String {
    let department = escape_html(&view.department);
    let action = escape_html(&format!(
        "/ai_assistant?department={}",
        encode_query_value(&view.department)
    ));
    let prompt = escape_html(view.prompt.as_deref().unwrap_or(""));

    let mut body = format!(
        r#"<h1>{department} Assistant</h1>
<form method="post" action="{action}" enctype="multipart/form-data">
<p><label>Question<br><textarea name="prompt" required>{prompt}</textarea></label></p>
<p><label>PDF <input type="file" name="pdf_file" accept="application/pdf"></label></p>
<p><button type="submit">Ask</button></p>
</form>
"#
    );

    if let Some(error) = &view.error {
        body.push_str(&format!("<div class=\"error\">{}</div>\n", escape_html(error)));
    }

    if view.show_content {
        if let Some(html) = &view.response_html {
            body.push_str(&format!(
                "<h2>Your question</h2>\n<p>{prompt}</p>\n<h2>Answer</h2>\n<div class=\"response\">{html}</div>\n"
            ));
        }
        if let Some(text) = &view.response_text {
            body.push_str(&read_aloud_controls(text));
        }
    }

    layout(&format!("{} Assistant", view.department), &body)
}

fn read_aloud_controls(text: &str) -> String {
    format!(
        r#"<div class="speech">
<textarea id="speech-text" hidden>{text}</textarea>
<button type="button" onclick="speech('speak')">Read aloud</button>
<button type="button" onclick="speech('pause')">Pause</button>
<button type="button" onclick="speech('resume')">Resume</button>
<button type="button" onclick="speech('stop')">Stop</button>
<span id="speech-status"></span>
</div>
<script>
let sessionId = null;
async function speech(action) {{
  const status = document.getElementById('speech-status');
  let resp;
  if (action === 'speak') {{
    const text = document.getElementById('speech-text').value;
    resp = await fetch('/speech/speak', {{
      method: 'POST',
      headers: {{ 'Content-Type': 'application/json' }},
      body: JSON.stringify({{ text }}),
    }});
  }} else if (sessionId !== null) {{
    resp = await fetch(`/speech/${{sessionId}}/${{action}}`, {{ method: 'POST' }});
  }} else {{
    return;
  }}
  const data = await resp.json();
  if (data.session_id !== undefined) sessionId = data.session_id;
  status.textContent = data.error || data.status;
}}
</script>
"#,
        text = escape_html(text)
    )
}

/// Percent-encode a query value (RFC 3986 unreserved characters pass through).
fn encode_query_value(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
