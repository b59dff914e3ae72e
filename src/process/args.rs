/// Splits a composed command line into arguments.
///
/// Whitespace separates arguments. Double quotes group text containing
/// whitespace and are removed; `\"` inside quotes is a literal quote.
pub fn split_args(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            '\\' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// Wraps a path or url in double quotes for a composed command line.
pub fn quote_arg(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_runs_of_whitespace() {
        assert_eq!(
            split_args("  -y -loglevel  info -i - "),
            vec!["-y", "-loglevel", "info", "-i", "-"]
        );
    }

    #[test]
    fn quoted_paths_keep_spaces() {
        assert_eq!(
            split_args(r#"-i "/media/my clip.mkv" -f mp4 "out file.mp4""#),
            vec!["-i", "/media/my clip.mkv", "-f", "mp4", "out file.mp4"]
        );
    }

    #[test]
    fn empty_quotes_are_an_argument() {
        assert_eq!(split_args(r#"-metadata title="""#), vec!["-metadata", "title="]);
        assert_eq!(split_args(r#"a "" b"#), vec!["a", "", "b"]);
    }

    #[test]
    fn quote_roundtrips_through_split() {
        let quoted = quote_arg(r#"say "hi".mp4"#);
        assert_eq!(split_args(&quoted), vec![r#"say "hi".mp4"#]);
    }
}
