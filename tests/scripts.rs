//! Black-box end-to-end tests: each one writes a small `.np` program to a temp file,
//! runs the compiled `nanolox` binary against it, and checks stdout/stderr/exit code.

use std::io::Write;
use std::process::{Command, Output};

fn run(source: &str) -> Output {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "nanolox-test-{}-{:?}.np",
        std::process::id(),
        std::thread::current().id()
    ));

    {
        let mut file = std::fs::File::create(&path).expect("create temp source file");
        file.write_all(source.as_bytes()).expect("write source");
    }

    let output = Command::new(env!("CARGO_BIN_EXE_nanolox"))
        .arg(&path)
        .output()
        .expect("run nanolox binary");

    std::fs::remove_file(&path).ok();
    output
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn arithmetic_precedence() {
    let output = run("print 1 + 2 * 3;");
    assert_eq!(Some(0), output.status.code());
    assert_eq!("7\n", stdout(&output));
}

#[test]
fn string_concatenation_of_globals() {
    let output = run(r#"var a = "hi"; var b = "!"; print a + b;"#);
    assert_eq!(Some(0), output.status.code());
    assert_eq!("hi!\n", stdout(&output));
}

#[test]
fn for_loop_accumulation() {
    let output = run("var x = 0; for (var i = 1; i <= 3; i = i + 1) x = x + i; print x;");
    assert_eq!(Some(0), output.status.code());
    assert_eq!("6\n", stdout(&output));
}

#[test]
fn if_else_with_and() {
    let output = run(r#"if (true and false) print "a"; else print "b";"#);
    assert_eq!(Some(0), output.status.code());
    assert_eq!("b\n", stdout(&output));
}

#[test]
fn negating_a_bool_is_a_runtime_error() {
    let output = run("print -true;");
    assert_eq!(Some(70), output.status.code());
    assert!(stderr(&output).contains("Operand must be a number"));
}

#[test]
fn reading_an_undefined_variable_is_a_runtime_error() {
    let output = run("print y;");
    assert_eq!(Some(70), output.status.code());
    assert!(stderr(&output).contains("Undefined variable 'y'"));
}

#[test]
fn wrong_argument_count_exits_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_nanolox"))
        .output()
        .expect("run nanolox binary with no arguments");
    assert_eq!(Some(64), output.status.code());
}

#[test]
fn non_np_extension_is_rejected() {
    let mut path = std::env::temp_dir();
    path.push(format!("nanolox-test-wrong-ext-{}.txt", std::process::id()));
    std::fs::write(&path, "print 1;").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_nanolox"))
        .arg(&path)
        .output()
        .expect("run nanolox binary");

    std::fs::remove_file(&path).ok();
    assert_eq!(Some(74), output.status.code());
}

#[test]
fn compile_error_exits_dataerr() {
    let output = run("print ;");
    assert_eq!(Some(65), output.status.code());
}
