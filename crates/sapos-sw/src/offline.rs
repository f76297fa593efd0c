//! Offline fallback page.

use url::Url;

use crate::fetch::Response;

/// Render the self-contained offline document.
pub fn offline_html(app_name: &str) -> String {
    let name = escape(app_name);
    format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Offline - {name}</title>
  <style>
    body {{
      font-family: Arial, sans-serif;
      text-align: center;
      padding: 50px;
      background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
      color: white;
      min-height: 100vh;
      margin: 0;
      display: flex;
      flex-direction: column;
      justify-content: center;
      align-items: center;
    }}
    .offline-container {{
      background: rgba(255,255,255,0.1);
      padding: 40px;
      border-radius: 20px;
      max-width: 400px;
    }}
    button {{
      background: #4caf50;
      color: white;
      border: none;
      padding: 15px 30px;
      border-radius: 25px;
      font-size: 1.1em;
      cursor: pointer;
    }}
  </style>
</head>
<body>
  <div class="offline-container">
    <h1>⚽ {name}</h1>
    <h2>📡 Você está offline</h2>
    <p>Não foi possível conectar à internet. Verifique sua conexão e tente novamente.</p>
    <button onclick="window.location.reload()">🔄 Tentar Novamente</button>
  </div>
</body>
</html>
"#
    )
}

/// The offline page as a response served from `url`.
pub fn offline_response(url: Url, app_name: &str) -> Response {
    Response::html(url, offline_html(app_name))
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_page_names_app() {
        let html = offline_html("Sapos League");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Offline - Sapos League</title>"));
        assert!(html.contains("Você está offline"));
    }

    #[test]
    fn test_app_name_is_escaped() {
        let html = offline_html("<b>Liga</b>");
        assert!(html.contains("&lt;b&gt;Liga&lt;/b&gt;"));
        assert!(!html.contains("<b>Liga"));
    }

    #[test]
    fn test_offline_response_is_html() {
        let url = Url::parse("https://sapos-league.web.app/offline.html").unwrap();
        let response = offline_response(url, "Sapos League");
        assert!(response.ok());
        assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
    }
}
