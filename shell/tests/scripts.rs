mod common;

use common::Workspace;
use rstest::{fixture, rstest};
use std::fs;

#[fixture]
fn ws() -> Workspace {
    Workspace::new("scripts")
}

#[rstest]
#[case("1,1,5", "1 2 3 4 5")]
#[case("5,-1,1", "5 4 3 2 1")]
#[case("0,2,7", "0 2 4 6")]
#[case("3,1,1", "")]
fn for_l_counts(mut ws: Workspace, #[case] set: &str, #[case] expected: &str) {
    let out = ws.run_trimmed(&format!("for /l %i in ({set}) do @echo %i"));
    assert_eq!(out.join(" "), expected);
}

#[rstest]
#[case("if 10 GTR 9 (echo yes) else echo no", "yes")]
#[case("if 10a GTR 9 (echo yes) else echo no", "no")]
#[case("if /i ABC==abc echo same", "same")]
#[case("if not exist nothing.txt echo missing", "missing")]
#[case("if defined UNSET_NAME (echo set) else (echo unset)", "unset")]
fn if_conditions(mut ws: Workspace, #[case] line: &str, #[case] expected: &str) {
    assert_eq!(ws.run_trimmed(line), vec![expected]);
}

#[rstest]
fn variables_expand_before_the_command_runs(mut ws: Workspace) {
    let out = ws.run_trimmed("set A=Hello\nset B=World\necho %A%%B%\necho %A:~1,3% %A:l=L%");
    assert_eq!(out, vec!["HelloWorld", "ell HeLlo"]);
}

#[rstest]
fn conditional_operators(mut ws: Workspace) {
    assert_eq!(ws.run_trimmed("echo A && echo B || echo C"), vec!["A", "B"]);
    assert_eq!(ws.run_trimmed("nosuchprogram 2>nul && echo B || echo C"), vec!["C"]);
    assert_eq!(ws.cmd.errorlevel(), 9009);
}

#[rstest]
fn later_redirection_wins(mut ws: Workspace) {
    ws.run("echo data>first.txt 1>second.txt");
    assert!(!ws.dir.join("first.txt").exists());
    assert_eq!(fs::read_to_string(ws.dir.join("second.txt")).unwrap(), "data\n");

    ws.run("echo more>>second.txt");
    assert_eq!(fs::read_to_string(ws.dir.join("second.txt")).unwrap(), "data\nmore\n");
}

#[rstest]
fn pipe_feeds_find_and_cleans_up(mut ws: Workspace) {
    assert_eq!(ws.run_trimmed("echo hello | find \"hello\""), vec!["hello"]);
    assert_eq!(ws.cmd.errorlevel(), 0);

    assert_eq!(ws.run("echo hello | find \"absent\""), "");
    assert_eq!(ws.cmd.errorlevel(), 1);

    let leftovers: Vec<_> = fs::read_dir(&ws.dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("CMD"))
        .collect();
    assert!(leftovers.is_empty());
}

#[rstest]
fn pipe_stops_when_left_side_cannot_launch(mut ws: Workspace) {
    assert_eq!(ws.run("nosuchprogram 2>nul | find /v \"x\""), "");
    assert_eq!(ws.cmd.errorlevel(), 9009);
    assert_eq!(ws.cmd.exit_code(), None);
}

#[rstest]
fn unknown_command_is_reported(mut ws: Workspace) {
    ws.run("nosuchprogram");
    assert_eq!(ws.cmd.errorlevel(), 9009);
    assert!(ws.stderr().contains("'nosuchprogram' is not recognized"));
}

#[rstest]
fn double_percent_in_batch_is_one_percent(mut ws: Workspace) {
    ws.write("pct.cmd", "@echo off\necho 100%%\necho %%PATH%%\n");
    assert_eq!(ws.run_trimmed("pct"), vec!["100%", "%PATH%"]);
}

#[rstest]
fn batch_arguments_and_shift(mut ws: Workspace) {
    ws.write("args.cmd", "@echo off\necho %0 %1 %2\necho %~n0\nshift\necho %1\n");
    assert_eq!(ws.run_trimmed("args.cmd one \"two words\""), vec!["args.cmd one \"two words\"", "args", "\"two words\""]);
}

#[rstest]
fn for_f_splits_file_lines(mut ws: Workspace) {
    ws.write("data.csv", "a,b,c\nd,e,f\n");
    ws.write(
        "columns.cmd",
        "@echo off\nfor /f \"tokens=1,3 delims=,\" %%x in (data.csv) do echo %%x-%%y\n",
    );
    assert_eq!(ws.run_trimmed("columns"), vec!["a-c", "d-f"]);
}

#[rstest]
fn goto_skips_lines(mut ws: Workspace) {
    ws.write(
        "jump.cmd",
        "@echo off\ngoto skip\necho skipped\n:skip\necho reached\ngoto :eof\necho after eof\n",
    );
    assert_eq!(ws.run_trimmed("jump"), vec!["reached"]);
}

#[rstest]
fn call_label_returns_with_exit_b(mut ws: Workspace) {
    ws.write(
        "sub.cmd",
        "@echo off\ncall :greet world\necho back %errorlevel%\nexit /b 0\n:greet\necho hello %1\nexit /b 3\n",
    );
    assert_eq!(ws.run_trimmed("sub"), vec!["hello world", "back 3"]);
    assert_eq!(ws.cmd.errorlevel(), 0);
    assert_eq!(ws.cmd.exit_code(), None);
}

#[rstest]
fn call_runs_another_batch_and_continues(mut ws: Workspace) {
    ws.write("inner.cmd", "@echo inner %1\n");
    ws.write("outer.cmd", "@echo off\ncall inner x\necho outer\ninner y\necho unreachable\n");
    assert_eq!(ws.run_trimmed("outer"), vec!["inner x", "outer", "inner y"]);
}

#[rstest]
fn setlocal_scopes_end_with_the_batch(mut ws: Workspace) {
    ws.run("set OUTER=1");
    ws.write(
        "scope.cmd",
        "@echo off\nsetlocal\nset OUTER=2\nset INNER=x\nendlocal\necho %OUTER%\nsetlocal\nset LEAKED=1\n",
    );
    assert_eq!(ws.run_trimmed("scope"), vec!["1"]);
    assert_eq!(ws.cmd.env().get_var("OUTER").as_deref(), Some("1"));
    assert_eq!(ws.cmd.env().get_var("INNER"), None);
    assert_eq!(ws.cmd.env().get_var("LEAKED"), None);
}

#[rstest]
fn exit_without_b_stops_everything(mut ws: Workspace) {
    ws.write("quit.cmd", "@echo off\necho before\nexit 4\necho after\n");
    assert_eq!(ws.run_trimmed("quit\necho never"), vec!["before"]);
    assert_eq!(ws.cmd.exit_code(), Some(4));
}

#[rstest]
fn block_spans_lines_in_batch(mut ws: Workspace) {
    ws.write("block.cmd", "@echo off\nif exist block.cmd (\n  echo one\n  echo two\n) else (\n  echo none\n)\n");
    assert_eq!(ws.run_trimmed("block"), vec!["one", "two"]);
}

#[rstest]
fn endlocal_only_closes_scopes_of_its_own_batch(mut ws: Workspace) {
    ws.write("inner.cmd", "endlocal\n");
    ws.write("outer.cmd", "@echo off\nsetlocal\nset A=outer\ncall inner.cmd\necho A=%A%\n");
    assert_eq!(ws.run_trimmed("outer"), vec!["A=outer"]);
    assert_eq!(ws.cmd.env().get_var("A"), None);
}

#[rstest]
fn launch_failure_in_batch_pipe_ends_the_interpreter(mut ws: Workspace) {
    ws.write("pipe.cmd", "@echo off\nnosuchprogram 2>nul | echo x\necho after\n");
    assert_eq!(ws.run("pipe\necho never"), "");
    assert_eq!(ws.cmd.exit_code(), Some(255));
}

#[rstest]
fn delayed_expansion_sees_assignments_inside_loop_body(mut ws: Workspace) {
    ws.cmd.set_delayed_expansion(true);
    let out = ws.run_trimmed("for /l %i in (1,1,3) do (set N=%i& echo !N!)");
    assert_eq!(out, vec!["1", "2", "3"]);
}

#[rstest]
fn substring_with_start_only(mut ws: Workspace) {
    assert_eq!(ws.run_trimmed("set V=0123456789\necho %V:~5%"), vec!["56789"]);
}

#[rstest]
fn exit_status_keeps_low_32_bits(mut ws: Workspace) {
    ws.write("big.cmd", "@echo off\nexit /b 4294967297\n");
    ws.run("big");
    assert_eq!(ws.cmd.errorlevel(), 1);
    assert_eq!(ws.cmd.exit_code(), None);
}

#[rstest]
fn disabled_extensions_turn_off_eof_label_calls_and_prompts(mut ws: Workspace) {
    ws.write(
        "plain.cmd",
        "@echo off\nsetlocal disableextensions\nset /p X=prompt\nset /p\ncall :sub 2>nul\necho call %errorlevel%\ngoto :eof\necho skipped\n:eof\necho label eof\nendlocal\ngoto :eof\necho unreachable\n:sub\necho in sub\n",
    );
    assert_eq!(ws.run_trimmed("plain"), vec!["/p X=prompt", "call 9009", "label eof"]);
}
