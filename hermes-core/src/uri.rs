/// Replace `{name}` placeholders in `template` with `vars`, in order.
///
/// Values are percent-encoded. Placeholders left over after the values run out
/// stay as written; surplus values are ignored.
pub fn expand_uri(template: &str, vars: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut values = vars.iter();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let placeholder = &rest[open..open + close + 1];
        match values.next() {
            Some(v) => out.push_str(&urlencoding::encode(v)),
            None => out.push_str(placeholder),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn substitutes_in_order_ignoring_names() {
        let url = expand_uri("http://svc/a/{x}/b/{y}", &vars(&["1", "2"]));
        assert_eq!(url, "http://svc/a/1/b/2");
    }

    #[test]
    fn encodes_values() {
        let url = expand_uri("http://svc/q/{term}", &vars(&["a b/c"]));
        assert_eq!(url, "http://svc/q/a%20b%2Fc");
    }

    #[test]
    fn leaves_unfilled_placeholders_and_ignores_extra_values() {
        assert_eq!(expand_uri("/a/{x}/{y}", &vars(&["1"])), "/a/1/{y}");
        assert_eq!(expand_uri("/plain", &vars(&["unused"])), "/plain");
    }

    #[test]
    fn unclosed_brace_is_copied_verbatim() {
        assert_eq!(expand_uri("/a/{x", &vars(&["1"])), "/a/{x");
    }
}
