// ABOUTME: Templating seam used to render learned commands and the render builtin
// ABOUTME: PositionalRenderer substitutes $0 (all args) and $1..$9 (positional args)

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template references argument ${0} but only {1} were given")]
    MissingArgument(usize, usize),
    #[error("dangling '$' at end of template")]
    DanglingDollar,
}

/// Pure rendering function: `render(template, args) -> output`
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, args: &str) -> Result<String, TemplateError>;
}

/// Minimal positional renderer.
///
/// `$0` expands to the whole argument string, `$1`..`$9` to whitespace-separated
/// arguments, and `$$` to a literal dollar sign.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionalRenderer;

impl TemplateRenderer for PositionalRenderer {
    fn render(&self, template: &str, args: &str) -> Result<String, TemplateError> {
        let positional: Vec<&str> = args.split_whitespace().collect();
        let mut out = String::with_capacity(template.len() + args.len());
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('$') => out.push('$'),
                Some(d) if d.is_ascii_digit() => {
                    let index = d.to_digit(10).unwrap_or(0) as usize;
                    if index == 0 {
                        out.push_str(args.trim());
                    } else {
                        let arg = positional
                            .get(index - 1)
                            .ok_or(TemplateError::MissingArgument(index, positional.len()))?;
                        out.push_str(arg);
                    }
                }
                Some(other) => {
                    out.push('$');
                    out.push(other);
                }
                None => return Err(TemplateError::DanglingDollar),
            }
        }

        Ok(out)
    }
}
