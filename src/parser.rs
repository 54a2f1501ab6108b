//! Spec file parser.
//!
//! Turns the bytes of a spec file into a [`TestSpec`]. The expected stderr and stdout blocks are
//! kept as raw bytes; only header lines need to be UTF-8.

use crate::errors::ParseError;
use crate::schema::{Directive, ExpectedStdout, STDOUT_MARKER, TestSpec};
use std::collections::HashSet;
use std::path::Path;

/// Parse a spec file.
///
/// `name` is the test name used in errors. When the spec has a `stdout_file` directive, the file
/// is resolved against `base_dir` and read eagerly as the expected stdout.
pub fn parse_spec(name: &str, contents: &[u8], base_dir: &Path) -> Result<TestSpec, ParseError> {
    let parsed = parse_blocks(name, contents)?;
    let mut spec = parsed.spec;

    if let Some(declared) = parsed.stdout_file {
        if parsed.saw_stdout_marker {
            return Err(ParseError::ConflictingStdout {
                name: name.to_string(),
            });
        }
        let path = base_dir.join(&declared);
        let contents = std::fs::read(&path).map_err(|source| ParseError::StdoutFile {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        spec.expected_stdout = ExpectedStdout::File {
            declared,
            path,
            contents,
        };
    } else {
        spec.expected_stdout = ExpectedStdout::Inline(parsed.stdout);
    }

    Ok(spec)
}

/// Render a spec file from its header and a pair of output bodies.
///
/// This is the inverse of [`parse_spec`] for bodies that do not begin with a `#` line.
/// `stdout` is written after a `# STDOUT:` marker only when it is non-empty, or when the file
/// would otherwise be empty.
pub fn render_spec(header: &str, stderr: &[u8], stdout: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + stderr.len());
    out.extend_from_slice(header.as_bytes());
    if let Some(stdout) = stdout.filter(|s| !s.is_empty()) {
        ensure_line_break(&mut out);
        out.extend_from_slice(stderr);
        ensure_line_break(&mut out);
        out.extend_from_slice(STDOUT_MARKER.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(stdout);
    } else if !stderr.is_empty() {
        ensure_line_break(&mut out);
        out.extend_from_slice(stderr);
    }
    if out.is_empty() {
        // An empty file does not parse; a bare marker means empty stderr and stdout.
        out.extend_from_slice(STDOUT_MARKER.as_bytes());
        out.push(b'\n');
    }
    out
}

fn ensure_line_break(out: &mut Vec<u8>) {
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
}

struct Blocks {
    spec: TestSpec,
    stdout: Vec<u8>,
    stdout_file: Option<String>,
    saw_stdout_marker: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Header,
    Stderr,
    Stdout,
}

fn parse_blocks(name: &str, contents: &[u8]) -> Result<Blocks, ParseError> {
    if contents.is_empty() {
        return Err(ParseError::Empty {
            name: name.to_string(),
        });
    }

    let mut spec = TestSpec {
        name: name.to_string(),
        ..TestSpec::default()
    };
    let mut header = String::new();
    let mut stdout = Vec::new();
    let mut stdout_file = None;
    let mut saw_stdout_marker = false;
    let mut seen = HashSet::new();
    let mut section = Section::Header;

    for (idx, line) in contents.split_inclusive(|&b| b == b'\n').enumerate() {
        let line_no = idx + 1;

        if section != Section::Stdout && is_stdout_marker(line) {
            section = Section::Stdout;
            saw_stdout_marker = true;
            continue;
        }

        match section {
            Section::Header if is_directive_line(line) => {
                let text = std::str::from_utf8(line).map_err(|_| ParseError::NonUtf8Header {
                    name: name.to_string(),
                    line: line_no,
                })?;
                apply_directive(&mut spec, &mut stdout_file, &mut seen, name, line_no, text)?;
                header.push_str(text);
            }
            Section::Header | Section::Stderr => {
                section = Section::Stderr;
                spec.expected_stderr.extend_from_slice(line);
            }
            Section::Stdout => {
                if is_stdout_marker(line) || names_known_directive(line) {
                    return Err(ParseError::DirectiveInStdout {
                        name: name.to_string(),
                        line: line_no,
                        text: String::from_utf8_lossy(strip_eol(line)).into_owned(),
                    });
                }
                stdout.extend_from_slice(line);
            }
        }
    }

    spec.header = header;
    Ok(Blocks {
        spec,
        stdout,
        stdout_file,
        saw_stdout_marker,
    })
}

fn apply_directive(
    spec: &mut TestSpec,
    stdout_file: &mut Option<String>,
    seen: &mut HashSet<Directive>,
    name: &str,
    line: usize,
    text: &str,
) -> Result<(), ParseError> {
    let display = text.trim_end_matches(['\n', '\r']).to_string();
    let (key, value) = split_directive(text);

    let directive = Directive::from_key(key).ok_or_else(|| ParseError::UnknownDirective {
        name: name.to_string(),
        line,
        key: key.to_string(),
        text: display.clone(),
    })?;

    if !seen.insert(directive) {
        return Err(ParseError::DuplicateDirective {
            name: name.to_string(),
            line,
            key: directive.key().to_string(),
            text: display,
        });
    }

    if directive.is_flag() {
        if value.is_some_and(|v| !v.is_empty()) {
            return Err(ParseError::UnexpectedValue {
                name: name.to_string(),
                line,
                text: display,
            });
        }
        spec.slow = true;
        return Ok(());
    }

    let missing = || ParseError::MissingValue {
        name: name.to_string(),
        line,
        key: directive.key().to_string(),
        text: display.clone(),
    };
    let value = value.ok_or_else(missing)?;
    let split_words = |value: &str| {
        shell_words::split(value).map_err(|source| ParseError::ShellWords {
            name: name.to_string(),
            line,
            text: display.clone(),
            source,
        })
    };

    match directive {
        Directive::Exe => spec.executable = Some(non_empty(value).ok_or_else(missing)?),
        Directive::File => spec.input_file = Some(non_empty(value).ok_or_else(missing)?),
        Directive::StdoutFile => *stdout_file = Some(non_empty(value).ok_or_else(missing)?),
        Directive::Flags => spec.flags = split_words(value)?,
        Directive::Args => spec.args = split_words(value)?,
        Directive::Error => {
            spec.expected_exit_code =
                value
                    .parse()
                    .map_err(|source| ParseError::InvalidErrorCode {
                        name: name.to_string(),
                        line,
                        text: display.clone(),
                        source,
                    })?;
        }
        Directive::Slow => spec.slow = true,
    }
    Ok(())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Split `# key: value` into a trimmed key and optional trimmed value.
fn split_directive(text: &str) -> (&str, Option<&str>) {
    let body = text.trim_start().trim_start_matches('#');
    let body = body.trim_end_matches(['\n', '\r']);
    match body.split_once(':') {
        Some((key, value)) => (key.trim(), Some(value.trim())),
        None => (body.trim(), None),
    }
}

fn strip_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_stdout_marker(line: &[u8]) -> bool {
    strip_eol(line).eq_ignore_ascii_case(STDOUT_MARKER.as_bytes())
}

fn is_directive_line(line: &[u8]) -> bool {
    line.trim_ascii_start().starts_with(b"#")
}

/// Whether a line would be read as a recognized directive in header position.
fn names_known_directive(line: &[u8]) -> bool {
    if !is_directive_line(line) {
        return false;
    }
    match std::str::from_utf8(line) {
        Ok(text) => Directive::from_key(split_directive(text).0).is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn parse(contents: &str) -> Result<TestSpec, ParseError> {
        parse_spec("case.txt", contents.as_bytes(), Path::new("."))
    }

    #[test]
    fn parses_all_directives() {
        let spec = parse(
            "# exe: ../out/pnacl-opt\n\
             # flags: -m -v 'a b'\n\
             # file: data/hello.pexe\n\
             # args: one two\n\
             # error: 3\n\
             # slow\n\
             warning: something\n",
        )
        .unwrap();

        assert_eq!(spec.name, "case.txt");
        assert_eq!(spec.executable.as_deref(), Some("../out/pnacl-opt"));
        assert_eq!(spec.flags, vec!["-m", "-v", "a b"]);
        assert_eq!(spec.input_file.as_deref(), Some("data/hello.pexe"));
        assert_eq!(spec.args, vec!["one", "two"]);
        assert_eq!(spec.expected_exit_code, 3);
        assert!(spec.slow);
        assert_eq!(spec.expected_stderr, b"warning: something\n");
        assert_eq!(spec.expected_stdout, ExpectedStdout::Inline(vec![]));
        assert!(spec.header.starts_with("# exe:"));
        assert!(spec.header.ends_with("# slow\n"));
    }

    #[test]
    fn keys_are_case_insensitive() {
        let spec = parse("# EXE: prog\n#Error:2\n").unwrap();
        assert_eq!(spec.executable.as_deref(), Some("prog"));
        assert_eq!(spec.expected_exit_code, 2);
    }

    #[test]
    fn splits_stderr_and_stdout_blocks() {
        let spec =
            parse("# file: x.pexe\nerr line 1\nerr line 2\n# stdout:\nout 1\n# note\n").unwrap();
        assert_eq!(spec.expected_stderr, b"err line 1\nerr line 2\n");
        assert_eq!(
            spec.expected_stdout,
            ExpectedStdout::Inline(b"out 1\n# note\n".to_vec())
        );
    }

    #[test]
    fn marker_may_directly_follow_header() {
        let spec = parse("# file: x.pexe\n# STDOUT:\nhello\n").unwrap();
        assert!(spec.expected_stderr.is_empty());
        assert_eq!(spec.expected_stdout.bytes(), b"hello\n");
        assert_eq!(spec.header, "# file: x.pexe\n");
    }

    #[test]
    fn stderr_block_keeps_hash_lines_literally() {
        let spec = parse("first\n# exe: not a directive here\n").unwrap();
        assert_eq!(spec.expected_stderr, b"first\n# exe: not a directive here\n");
        assert!(spec.executable.is_none());
    }

    #[test]
    fn empty_file_is_an_error() {
        assert!(matches!(parse(""), Err(ParseError::Empty { .. })));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let err = parse("# timeout: 3\n").unwrap_err();
        match err {
            ParseError::UnknownDirective { name, line, key, text } => {
                assert_eq!(name, "case.txt");
                assert_eq!(line, 1);
                assert_eq!(key, "timeout");
                assert_eq!(text, "# timeout: 3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_directive_is_an_error() {
        let err = parse("# flags: -a\n# FLAGS: -b\n").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateDirective { line: 2, .. }));
    }

    #[test]
    fn duplicate_error_directive_is_caught_even_when_zero() {
        let err = parse("# error: 0\n# error: 1\n").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateDirective { .. }));
    }

    #[test]
    fn directive_inside_stdout_is_an_error() {
        let err = parse("# STDOUT:\nout\n# args: x\n").unwrap_err();
        assert!(matches!(err, ParseError::DirectiveInStdout { line: 3, .. }));

        let err = parse("# STDOUT:\nout\n# stdout:\n").unwrap_err();
        assert!(matches!(err, ParseError::DirectiveInStdout { line: 3, .. }));
    }

    #[test]
    fn bad_error_code_is_an_error() {
        let err = parse("# error: nope\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidErrorCode { .. }));
    }

    #[test]
    fn slow_takes_no_value() {
        assert!(parse("# slow:\n").unwrap().slow);
        let err = parse("# slow: yes\n").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedValue { .. }));
    }

    #[test]
    fn valued_directive_without_value_is_an_error() {
        let err = parse("# exe\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingValue { .. }));
        let err = parse("# file:\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingValue { .. }));
    }

    #[test]
    fn unbalanced_quotes_are_an_error() {
        let err = parse("# flags: 'unterminated\n").unwrap_err();
        assert!(matches!(err, ParseError::ShellWords { .. }));
    }

    #[test]
    fn stdout_file_is_read_eagerly() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("out.bin"), [0u8, 159, 146, 150]).unwrap();

        let spec = parse_spec("bin.txt", b"# stdout_file: out.bin\n", dir.path()).unwrap();
        match spec.expected_stdout {
            ExpectedStdout::File {
                declared,
                path,
                contents,
            } => {
                assert_eq!(declared, "out.bin");
                assert_eq!(path, dir.path().join("out.bin"));
                assert_eq!(contents, vec![0u8, 159, 146, 150]);
            }
            other => panic!("expected file stdout, got {other:?}"),
        }
    }

    #[test]
    fn stdout_file_conflicts_with_stdout_block() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("out.bin"), b"x").unwrap();
        let err = parse_spec(
            "bin.txt",
            b"# stdout_file: out.bin\n# STDOUT:\nx\n",
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::ConflictingStdout { .. }));
    }

    #[test]
    fn missing_stdout_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = parse_spec("bin.txt", b"# stdout_file: gone.bin\n", dir.path()).unwrap_err();
        assert!(matches!(err, ParseError::StdoutFile { .. }));
        assert_eq!(err.spec_name(), "bin.txt");
    }

    #[test]
    fn non_utf8_bodies_are_kept_verbatim() {
        let contents = b"# error: 1\n\xff\xfe\n# STDOUT:\n\x00\x01\n";
        let spec = parse_spec("raw.txt", contents, Path::new(".")).unwrap();
        assert_eq!(spec.expected_stderr, b"\xff\xfe\n");
        assert_eq!(spec.expected_stdout.bytes(), b"\x00\x01\n");
    }

    #[test]
    fn render_places_marker_on_its_own_line() {
        let rendered = render_spec("# error: 1\n", b"no newline", Some(b"out\n"));
        assert_eq!(rendered, b"# error: 1\nno newline\n# STDOUT:\nout\n");
    }

    #[test]
    fn render_omits_empty_stdout() {
        let rendered = render_spec("# error: 1\n", b"err\n", Some(b""));
        assert_eq!(rendered, b"# error: 1\nerr\n");
    }

    #[test]
    fn render_of_nothing_is_a_bare_marker() {
        let rendered = render_spec("", b"", Some(b""));
        assert_eq!(rendered, b"# STDOUT:\n");
        let spec = parse_spec("t.txt", &rendered, Path::new(".")).unwrap();
        assert!(spec.expected_stderr.is_empty());
        assert!(spec.expected_stdout.bytes().is_empty());
    }

    fn body_line() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 .:_-]{0,20}\n"
    }

    fn body() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(body_line(), 0..5).prop_map(|lines| lines.concat().into_bytes())
    }

    fn header() -> impl Strategy<Value = String> {
        (
            prop::option::of("[a-z./]{1,12}"),
            prop::collection::vec("[a-z-]{1,6}", 0..3),
            prop::option::of("[a-z.]{1,10}"),
            prop::option::of(-3i32..130),
            any::<bool>(),
        )
            .prop_map(|(exe, flags, file, error, slow)| {
                let mut header = String::new();
                if let Some(exe) = exe {
                    header.push_str(&format!("# exe: {exe}\n"));
                }
                if !flags.is_empty() {
                    header.push_str(&format!("# flags: {}\n", flags.join(" ")));
                }
                if let Some(file) = file {
                    header.push_str(&format!("# file: {file}\n"));
                }
                if let Some(error) = error {
                    header.push_str(&format!("# error: {error}\n"));
                }
                if slow {
                    header.push_str("# slow\n");
                }
                header
            })
    }

    proptest! {
        #[test]
        fn render_then_parse_round_trips(header in header(), stderr in body(), stdout in body()) {
            let rendered = render_spec(&header, &stderr, Some(&stdout));
            // A leading line that looks like a directive cannot be told apart from the header.
            prop_assume!(!stderr.starts_with(b"#"));

            let spec = parse_spec("p.txt", &rendered, Path::new(".")).unwrap();
            prop_assert_eq!(&spec.header, &header);
            prop_assert_eq!(&spec.expected_stderr, &stderr);
            prop_assert_eq!(spec.expected_stdout.bytes(), &stdout[..]);

            let again = render_spec(
                &spec.header,
                &spec.expected_stderr,
                Some(spec.expected_stdout.bytes()),
            );
            prop_assert_eq!(again, rendered);
        }
    }
}
