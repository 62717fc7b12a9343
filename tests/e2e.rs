use std::io::Write;
use std::process::{Command, Stdio};

use tempfile::NamedTempFile;

fn write_script(source: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("loxide_test_")
        .suffix(".lox")
        .tempfile()
        .unwrap();
    file.write_all(source.as_bytes()).unwrap();
    file
}

/// Run the loxide binary with `args` followed by a script containing
/// `source`; returns (stdout, stderr, exit_code)
fn run_loxide(args: &[&str], source: &str) -> (String, String, i32) {
    let script = write_script(source);
    let output = Command::new(env!("CARGO_BIN_EXE_loxide"))
        .args(args)
        .arg(script.path())
        .output()
        .expect("failed to execute loxide");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code().unwrap_or(-1))
}

fn assert_success(source: &str) -> String {
    let (stdout, stderr, code) = run_loxide(&["run"], source);
    assert_eq!(code, 0, "program should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(source: &str, expected_code: i32) -> String {
    let (_, stderr, code) = run_loxide(&["run"], source);
    assert_eq!(code, expected_code, "unexpected exit code, stderr:\n{}", stderr);
    stderr
}

#[test]
fn test_arithmetic() {
    let source = r#"
var x = 10 + 20 * 2;
print x;
print (x - 8) / 6;
print -x;
"#;
    assert_eq!(assert_success(source), "50\n7\n-50\n");
}

#[test]
fn test_control_flow() {
    let source = r#"
for (var i = 0; i < 5; i = i + 1) {
  if (i == 1 or i == 3) print i;
}
var n = 3;
while (n > 0) n = n - 1;
print n;
"#;
    assert_eq!(assert_success(source), "1\n3\n0\n");
}

#[test]
fn test_counter_closure() {
    let source = r#"
fun makeCounter() {
  var count = 0;
  fun increment() {
    count = count + 1;
    return count;
  }
  return increment;
}
var a = makeCounter();
var b = makeCounter();
print a();
print a();
print b();
"#;
    assert_eq!(assert_success(source), "1\n2\n1\n");
}

#[test]
fn test_class_initializer_and_super() {
    let source = r#"
class Shape {
  init(name) { this.name = name; }
  describe() { return "a " + this.name; }
}
class Square < Shape {
  init(side) {
    super.init("square");
    this.side = side;
  }
  area() { return this.side * this.side; }
  describe() { return super.describe() + " with side " + this.side; }
}
var s = Square(3);
print s.describe();
print s.area();
print s;
print Square;
"#;
    assert_eq!(
        assert_success(source),
        "a square with side 3\n9\nSquare instance\nSquare\n"
    );
}

#[test]
fn test_clock_native() {
    let stdout = assert_success("var t = clock(); print t >= 0; print clock;");
    assert_eq!(stdout, "true\n<native fn>\n");
}

#[test]
fn test_compile_error_exit_code() {
    let stderr = assert_failure("print 1 +;", 65);
    assert!(stderr.contains("[line 1] Error at ';': Expect expression."));
}

#[test]
fn test_runtime_error_exit_code() {
    let stderr = assert_failure("var a = \"x\";\nprint -a;", 70);
    assert!(stderr.contains("Operand must be a number.\n[line 2] in script"));
}

#[test]
fn test_undefined_property() {
    let stderr = assert_failure("class A {}\nA().missing;", 70);
    assert!(stderr.contains("Undefined property 'missing'."));
}

#[test]
fn test_missing_file_exit_code() {
    let output = Command::new(env!("CARGO_BIN_EXE_loxide"))
        .args(["run", "/nonexistent/missing.lox"])
        .output()
        .expect("failed to execute loxide");
    assert_eq!(output.status.code(), Some(74));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing.lox"));
}

#[test]
fn test_disasm_command() {
    let (stdout, stderr, code) = run_loxide(&["disasm"], "fun f(a) { return a; }\nprint f(1);");
    assert_eq!(code, 0, "stderr:\n{}", stderr);
    assert!(stdout.contains("== <script> =="));
    assert!(stdout.contains("== f =="));
    assert!(stdout.contains("OP_CLOSURE"));
    assert!(stdout.contains("OP_RETURN"));
}

#[test]
fn test_disasm_reports_compile_errors() {
    let (_, stderr, code) = run_loxide(&["disasm"], "var;");
    assert_eq!(code, 65);
    assert!(stderr.contains("Expect variable name."));
}

#[test]
fn test_trace_goes_to_stderr() {
    let (stdout, stderr, code) = run_loxide(&["run", "--trace", "--print-code"], "print 1 + 2;");
    assert_eq!(code, 0);
    assert_eq!(stdout, "3\n");
    assert!(stderr.contains("OP_ADD"));
}

#[test]
fn test_config_file() {
    let mut config = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    config.write_all(b"max_frames = 4\n").unwrap();
    let config_path = config.path().to_str().unwrap().to_string();

    let source = "fun f(n) { if (n > 0) f(n - 1); }\nf(2);\nprint \"fits\";\nf(10);";
    let (stdout, stderr, code) = run_loxide(&["run", "--config", &config_path], source);
    assert_eq!(code, 70);
    assert_eq!(stdout, "fits\n");
    assert!(stderr.contains("Stack overflow."));
}

#[test]
fn test_invalid_config_file() {
    let mut config = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    config.write_all(b"max_frames = \"many\"\n").unwrap();
    let config_path = config.path().to_str().unwrap().to_string();

    let (_, stderr, code) = run_loxide(&["run", "--config", &config_path], "print 1;");
    assert_eq!(code, 74);
    assert!(stderr.contains("failed to parse config"));
}

#[test]
fn test_repl_keeps_state_after_errors() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_loxide"))
        .arg("repl")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn loxide");

    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"var x = 20;\nprint x +;\nprint nil + 1;\nprint x * 2;\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success());
    assert!(stdout.contains("40\n"), "stdout:\n{}", stdout);
    assert!(stderr.contains("Expect expression."));
    assert!(stderr.contains("Operands must be two numbers or at least one string."));
}
