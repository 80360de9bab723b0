//! `run` writes the generated module to disk.

use std::path::Path;

const CONFIG: &str = r#"
[output]
module = "tiny"

[[function]]
name = "answer"
return = "int"
"#;

#[test]
fn run_writes_default_output_next_to_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bnd-pygen.toml");
    std::fs::write(&config, CONFIG).unwrap();

    let written = bnd_pygen::run(&config, None).unwrap();
    assert_eq!(written, dir.path().join("tinymodule.cc"));

    let text = std::fs::read_to_string(&written).unwrap();
    assert!(text.contains("PyInit_tiny(void)"));
    assert!(text.contains("{(char *) \"answer\", (PyCFunction) _wrap_answer, METH_NOARGS, NULL },"));
    assert_eq!(text, bnd_pygen::generate(&config).unwrap().text);
}

#[test]
fn run_honors_output_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bnd-pygen.toml");
    std::fs::write(&config, CONFIG).unwrap();
    let output = dir.path().join("out.cpp");

    let written = bnd_pygen::run(&config, Some(&output)).unwrap();
    assert_eq!(written, output);
    assert!(output.exists());
    assert!(!dir.path().join("tinymodule.cc").exists());
}

#[test]
fn missing_config_is_reported_with_path() {
    let err = bnd_pygen::generate(Path::new("does/not/exist.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("loading config from does/not/exist.toml"));
}
