//! End-to-end checks that extraction + antihack compose the way a real
//! client interaction would: a model response with prose and a fenced
//! block in, a clean submission out, with injected exits rejected (§4.7).

use sandbox_engine::extraction::{contains_exit_zero_prologue, submit_code_blocks};

#[test]
fn picks_the_preferred_language_block_out_of_a_multi_block_response() {
    let response = "Sure, here's a bash attempt first:\n```bash\necho nope\n```\nand the real answer:\n```python\nprint(1 + 1)\n```\n";
    let code = submit_code_blocks(response, Some("python"));
    assert_eq!(code.trim(), "print(1 + 1)");
}

#[test]
fn antihack_flags_a_submission_that_tries_to_force_success() {
    let submission = submit_code_blocks("```python\nexit(0)\nprint('never runs, but rc is 0')\n```", Some("python"));
    assert!(contains_exit_zero_prologue(&submission));
}

#[test]
fn legitimate_submission_using_exit_deep_inside_is_not_flagged() {
    let submission = submit_code_blocks(
        "```python\ndef main():\n    for i in range(3):\n        print(i)\n    exit(0)\n\nmain()\n```",
        Some("python"),
    );
    assert!(!contains_exit_zero_prologue(&submission));
}
