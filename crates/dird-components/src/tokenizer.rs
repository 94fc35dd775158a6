//! Shell-like tokenizer for inline job strings
//!
//! POSIX word splitting: whitespace separates words, single quotes preserve
//! everything literally, double quotes preserve everything except backslash
//! escapes of `"` and `\`, a bare backslash escapes the next character.

use crate::error::ComponentError;

/// Split an inline job string into words.
pub fn split_words(input: &str) -> Result<Vec<String>, ComponentError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    loop {
        let Some(c) = chars.next() else { break };
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ComponentError::InvalidArguments(
                                "unterminated single quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(ComponentError::InvalidArguments(
                                    "unterminated double quote".to_string(),
                                ))
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ComponentError::InvalidArguments(
                                "unterminated double quote".to_string(),
                            ))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(ComponentError::InvalidArguments(
                            "dangling escape".to_string(),
                        ))
                    }
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words() {
        assert_eq!(
            split_words("echo hello world").unwrap(),
            vec!["echo", "hello", "world"]
        );
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(split_words("  a \t b  ").unwrap(), vec!["a", "b"]);
        assert!(split_words("").unwrap().is_empty());
    }

    #[test]
    fn test_single_quotes_literal() {
        assert_eq!(
            split_words("echo 'hello world'").unwrap(),
            vec!["echo", "hello world"]
        );
        assert_eq!(split_words(r#"'a "b" c'"#).unwrap(), vec![r#"a "b" c"#]);
    }

    #[test]
    fn test_double_quotes_with_escapes() {
        assert_eq!(
            split_words(r#"echo "say \"hi\"""#).unwrap(),
            vec!["echo", r#"say "hi""#]
        );
        assert_eq!(split_words(r#""back\\slash""#).unwrap(), vec![r"back\slash"]);
    }

    #[test]
    fn test_adjacent_quoted_segments_join() {
        assert_eq!(split_words(r#"a'b'"c""#).unwrap(), vec!["abc"]);
    }

    #[test]
    fn test_flag_forms_survive() {
        assert_eq!(
            split_words("--timeout 30 --stdout-arg=result").unwrap(),
            vec!["--timeout", "30", "--stdout-arg=result"]
        );
    }

    #[test]
    fn test_unterminated_quote_is_error() {
        assert!(split_words("echo 'oops").is_err());
        assert!(split_words(r#"echo "oops"#).is_err());
        assert!(split_words("trailing\\").is_err());
    }

    #[test]
    fn test_empty_quoted_word() {
        assert_eq!(split_words("a '' b").unwrap(), vec!["a", "", "b"]);
    }
}
