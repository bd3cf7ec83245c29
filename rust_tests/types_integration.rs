//! End-to-end checks of the core data model's serialization contract (§3):
//! the shapes a client actually sends/receives over the wire.

use sandbox_engine::types::{FileMap, Language, RunRequest};

#[test]
fn run_request_deserializes_from_minimal_json() {
    let json = r#"{"code": "print(1)", "language": "python"}"#;
    let request: RunRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.language, Language::Python);
    assert_eq!(request.compile_timeout, 10.0);
    assert_eq!(request.run_timeout, 10.0);
    assert!(request.files.is_empty());
}

#[test]
fn run_request_round_trips_files_map() {
    let mut files = FileMap::new();
    files.insert("helper.py".to_string(), Some("aGVsbG8=".to_string()));
    let request = RunRequest {
        code: "import helper".to_string(),
        language: Language::Python,
        stdin: None,
        files,
        fetch_files: vec!["out.txt".to_string()],
        compile_timeout: 5.0,
        run_timeout: 5.0,
    };
    let json = serde_json::to_string(&request).unwrap();
    let back: RunRequest = serde_json::from_str(&json).unwrap();
    assert_eq!(back.fetch_files, vec!["out.txt".to_string()]);
    assert_eq!(back.files.get("helper.py").unwrap().as_deref(), Some("aGVsbG8="));
}

#[test]
fn every_language_variant_as_str_round_trips_via_json() {
    let all = [
        Language::Python, Language::Cpp, Language::Go, Language::GoTest, Language::Java,
        Language::Junit, Language::Nodejs, Language::Typescript, Language::Jest, Language::Pytest,
        Language::Rust, Language::Csharp, Language::Php, Language::Bash, Language::Ruby,
        Language::Lua, Language::R, Language::Perl, Language::DUt, Language::Scala,
        Language::Julia, Language::KotlinScript, Language::Verilog, Language::Lean,
        Language::Swift, Language::Racket, Language::Cuda, Language::PythonGpu,
    ];
    for lang in all {
        let json = serde_json::to_string(&lang).unwrap();
        let back: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), lang.as_str());
    }
}
