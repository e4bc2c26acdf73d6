use chrono::Utc;

use crate::{
    format::format_timestamp,
    models::SessionUser,
    sanitize::{sanitize_attribute, sanitize_text},
};

/// render_shell
///
/// The single-page application shell served for every page route. The client app
/// mounts on `#app` and reads the route and the signed-in identity from its data
/// attributes. All interpolated values go through the sanitizers.
pub fn render_shell(title: &str, route_name: &str, user: Option<&SessionUser>) -> String {
    let title = sanitize_text(title);
    let route = sanitize_attribute(route_name);
    let email = user
        .and_then(|user| user.email.as_deref())
        .map(sanitize_attribute)
        .unwrap_or_default();
    let role = user
        .and_then(|user| user.claims.as_ref())
        .and_then(|claims| claims.role.as_ref())
        .map(|role| sanitize_attribute(role.as_str()))
        .unwrap_or_default();
    let rendered_at = sanitize_attribute(&format_timestamp(Some(&Utc::now())));

    format!(
        r#"<!doctype html>
<html lang="ja">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <link rel="stylesheet" href="/assets/main.css">
  </head>
  <body>
    <div id="app" data-route="{route}" data-user="{email}" data-role="{role}" data-rendered-at="{rendered_at}"></div>
    <script type="module" src="/assets/main.js"></script>
  </body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escapes_untrusted_values() {
        let user = SessionUser {
            uid: "u1".into(),
            email: Some("\"><script>x</script>@example.com".into()),
            token: "t".into(),
            claims: None,
            expires_at: None,
        };
        let html = render_shell("<b>Applicants</b>", "Home", Some(&user));

        assert!(html.contains("<title>Applicants</title>"));
        assert!(html.contains(r#"data-user="scriptx/script@example.com""#));
        assert!(html.contains(r#"data-route="Home""#));
    }
}
