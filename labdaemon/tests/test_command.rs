//! Test cases for parsing and composing text commands.

use rstest::*;

use labdaemon::{Command, DaemonError, sanitize_command_line, split_subcommands};

#[rstest]
#[case("get_status", Some("get_status"), vec![], vec![])]
#[case("move 1000 upos=0", Some("move"), vec!["1000"], vec![("upos", "0")])]
#[case("sspd speed:200 accel=5", Some("sspd"), vec![], vec![("accel", "5"), ("speed", "200")])]
#[case("a=1 b c", None, vec!["b", "c"], vec![("a", "1")])]
#[case("url=http://host:80", None, vec![], vec![("url", "http://host:80")])]
fn parse_line(
    #[case] line: &str,
    #[case] name: Option<&str>,
    #[case] args: Vec<&str>,
    #[case] kwargs: Vec<(&str, &str)>,
) {
    let cmd = Command::parse(line).unwrap();
    assert_eq!(cmd.name(), name);
    assert_eq!(cmd.args(), args);
    let got: Vec<(&str, &str)> = cmd
        .kwargs()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    assert_eq!(got, kwargs);
}

#[rstest]
#[case("")]
#[case("   ")]
#[case("\t \t")]
fn parse_whitespace_only(#[case] line: &str) {
    let cmd = Command::parse(line).unwrap();
    assert!(cmd.is_empty());
    assert!(cmd.tokens().is_empty());
    assert_eq!(cmd.to_string(), "");
}

#[rstest]
fn kwargs_last_wins() {
    let cmd: Command = "set x=1 x:2".parse().unwrap();
    assert_eq!(cmd.get("x"), Some("2"));
    assert!(cmd.has_key("x"));
    assert!(!cmd.has_key("y"));
}

#[rstest]
fn quoted_arguments() {
    let cmd = Command::parse(r#"send 'hello world' msg="a b""#).unwrap();
    assert_eq!(cmd.args(), ["hello world"]);
    assert_eq!(cmd.get("msg"), Some("a b"));
    assert_eq!(cmd.body(), "hello world msg=a b");
}

#[rstest]
#[case("send 'open")]
#[case("send \"open")]
#[case("send open\\")]
fn parse_error(#[case] line: &str) {
    assert!(matches!(
        Command::parse(line),
        Err(DaemonError::CommandSyntax(_))
    ));
}

#[rstest]
#[case("get_status")]
#[case("move 1000 upos=0")]
#[case("send 'two words' key='a b'")]
fn compose_reparse(#[case] line: &str) {
    let cmd = Command::parse(line).unwrap();
    let again = Command::parse(&cmd.to_string()).unwrap();
    assert_eq!(again.name(), cmd.name());
    assert_eq!(again.args(), cmd.args());
    assert_eq!(again.kwargs(), cmd.kwargs());
}

#[rstest]
fn compose_builder() {
    let cmd = Command::new(Some("status"))
        .with_arg("ok")
        .with_kwarg("position", "500")
        .with_kwarg("hw_connected", "1");
    assert_eq!(cmd.to_string(), "status ok hw_connected=1 position=500");
}

#[rstest]
#[case("get_status\r\n", "get_status")]
#[case("get_status\n", "get_status")]
#[case("get_status", "get_status")]
fn sanitize(#[case] line: &str, #[case] exp: &str) {
    assert_eq!(sanitize_command_line(line), exp);
}

#[rstest]
fn subcommands() {
    let subs: Vec<&str> = split_subcommands(" gpos ; ;move 10 0;").collect();
    assert_eq!(subs, vec!["gpos", "move 10 0"]);
}
