use assert_cmd::cargo::cargo_bin_cmd;

fn help_output(args: &[&str]) -> String {
    let assert = cargo_bin_cmd!("uvh").args(args).assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 help")
}

#[test]
fn top_level_help_lists_commands() {
    let output = help_output(&["--help"]);
    for command in ["install", "update", "remove", "list", "browse", "doctor", "export"] {
        assert!(output.contains(command), "help missing {command}: {output}");
    }
}

#[test]
fn install_help_shows_usage() {
    let output = help_output(&["install", "--help"]);
    assert!(
        output.contains("uvh install <SOURCE> [SCRIPT]..."),
        "install usage missing: {output}"
    );
    assert!(output.contains("--add-source-package"), "{output}");
}

#[test]
fn completion_prints_a_script() {
    let output = help_output(&["completion", "bash"]);
    assert!(output.contains("_uvh"), "bash completion missing function: {output}");
}
