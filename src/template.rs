//! Window-title template rendering: a small hand-rolled `{Var}` substitution
//! renderer, not a full template engine, since the variable set is fixed and
//! small. Compiled once at boot; rendering after a successful parse cannot
//! fail.

use std::fmt;

/// Variables available to a title template.
#[derive(Debug, Clone)]
pub struct TitleVars {
    pub command: String,
    pub hostname: String,
    pub remote_addr: String,
    pub pid: u32,
}

/// A parsed template, ready to render repeatedly without re-parsing.
#[derive(Debug, Clone)]
pub struct Template {
    parts: Vec<Part>,
}

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Command,
    Hostname,
    RemoteAddr,
    Pid,
}

impl Template {
    /// Compile a `{Var}`-templated string. Unknown `{Foo}` placeholders are
    /// rejected at compile time so that rendering can never fail.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '{' {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(TemplateError::UnclosedBrace);
                }
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(match name.as_str() {
                    "Command" => Part::Command,
                    "Hostname" => Part::Hostname,
                    "RemoteAddr" => Part::RemoteAddr,
                    "Pid" => Part::Pid,
                    other => return Err(TemplateError::UnknownVariable(other.to_string())),
                });
            } else {
                literal.push(c);
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Template { parts })
    }

    /// Render the template. Infallible: all variables were resolved at
    /// compile time.
    pub fn render(&self, vars: &TitleVars) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Command => out.push_str(&vars.command),
                Part::Hostname => out.push_str(&vars.hostname),
                Part::RemoteAddr => out.push_str(&vars.remote_addr),
                Part::Pid => out.push_str(&vars.pid.to_string()),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateError {
    UnclosedBrace,
    UnknownVariable(String),
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnclosedBrace => write!(f, "unclosed '{{' in title_format"),
            Self::UnknownVariable(name) => write!(f, "unknown title_format variable {{{name}}}"),
        }
    }
}

impl std::error::Error for TemplateError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TitleVars {
        TitleVars {
            command: "bash".to_string(),
            hostname: "devbox".to_string(),
            remote_addr: "10.0.0.5".to_string(),
            pid: 4242,
        }
    }

    #[test]
    fn renders_all_variables() {
        let tpl = Template::compile("{Command} on {Hostname} from {RemoteAddr} (pid {Pid})").unwrap();
        assert_eq!(
            tpl.render(&vars()),
            "bash on devbox from 10.0.0.5 (pid 4242)"
        );
    }

    #[test]
    fn renders_literal_only() {
        let tpl = Template::compile("My Terminal").unwrap();
        assert_eq!(tpl.render(&vars()), "My Terminal");
    }

    #[test]
    fn unknown_variable_rejected_at_compile() {
        let err = Template::compile("{Bogus}").unwrap_err();
        assert_eq!(err, TemplateError::UnknownVariable("Bogus".to_string()));
    }

    #[test]
    fn unclosed_brace_rejected() {
        let err = Template::compile("{Command").unwrap_err();
        assert_eq!(err, TemplateError::UnclosedBrace);
    }

    #[test]
    fn default_template_compiles() {
        assert!(Template::compile("{Command} ({Hostname})").is_ok());
    }
}
