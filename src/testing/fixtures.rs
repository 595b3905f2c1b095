//! Canned project files and runner output.

/// A tiny TypeScript module under test.
pub const ADD_SOURCE: &str = "export function add(a: number, b: number): number {\n  return a + b;\n}\n";

/// A test for [`ADD_SOURCE`] that asserts the wrong sum.
pub const BROKEN_ADD_TEST: &str = "import { add } from './add';\n\ndescribe('add', () => {\n  it('broken', () => {\n    expect(add(1, 2)).toBe(4);\n  });\n});\n";

/// The corrected version of [`BROKEN_ADD_TEST`].
pub const FIXED_ADD_TEST: &str = "import { add } from './add';\n\ndescribe('add', () => {\n  it('adds', () => {\n    expect(add(1, 2)).toBe(3);\n  });\n});\n";

/// Jest console output for a run of [`BROKEN_ADD_TEST`].
pub const JEST_BROKEN_OUTPUT: &str = "FAIL src/add.test.ts
  add
    \u{2715} broken (2 ms)

  \u{25cf} add \u{203a} broken

    expect(received).toBe(expected) // Object.is equality

    Expected: 4
    Received: 3

      3 | describe('add', () => {
      4 |   it('broken', () => {
    > 5 |     expect(add(1, 2)).toBe(4);
        |                       ^

      at Object.<anonymous> (src/add.test.ts:5:23)

Test Suites: 1 failed, 1 total
Tests:       1 failed, 1 total
";

/// Jest JSON report for a run of [`BROKEN_ADD_TEST`].
pub const JEST_BROKEN_REPORT: &str = r#"{
  "success": false,
  "numFailedTests": 1,
  "testResults": [
    {
      "name": "/work/project/src/add.test.ts",
      "status": "failed",
      "message": "",
      "assertionResults": [
        {
          "title": "broken",
          "fullName": "add broken",
          "ancestorTitles": ["add"],
          "status": "failed",
          "failureMessages": [
            "Error: expect(received).toBe(expected) // Object.is equality\n\nExpected: 4\nReceived: 3\n    at Object.<anonymous> (/work/project/src/add.test.ts:5:23)"
          ],
          "failureDetails": [{ "matcherResult": { "expected": 4, "actual": 3, "pass": false } }],
          "duration": 2
        }
      ]
    }
  ]
}"#;

/// Wrap a test file in the agentic `generate_test` action.
#[must_use]
pub fn generate_action(code: &str) -> String {
    serde_json::json!({ "action": "generate_test", "code": code }).to_string()
}

/// The agentic `request_files` action.
#[must_use]
pub fn request_action(files: &[&str]) -> String {
    serde_json::json!({ "action": "request_files", "files": files }).to_string()
}
