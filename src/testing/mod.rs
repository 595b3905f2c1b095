//! Testing infrastructure for Kintsugi.
//!
//! Scripted test doubles for every collaborator the healing engine talks to,
//! plus canned project files and runner output.
//!
//! - **Mocks**: [`MockChatClient`], [`MockFileStore`], [`MockTestRunner`],
//!   [`MockFatalClassifier`]; each records its calls
//! - **Fixtures**: sample sources, tests and Jest output
//!
//! # Example
//!
//! ```rust,ignore
//! use kintsugi::testing::{MockChatClient, MockFileStore, MockTestRunner};
//!
//! let client = MockChatClient::new().with_reply("test('ok', () => {});");
//! let runner = MockTestRunner::new().with_failure("boom").with_pass();
//! let files = MockFileStore::new().with_file("src/add.ts", ADD_SOURCE);
//! ```

pub mod fixtures;
pub mod mocks;

pub use crate::llm::{MockChatClient, MockReply};
pub use fixtures::*;
pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentic::AgenticAction;

    #[test]
    fn test_action_fixtures_parse() {
        assert_eq!(
            AgenticAction::parse(&generate_action(FIXED_ADD_TEST)).unwrap(),
            AgenticAction::GenerateTest {
                code: FIXED_ADD_TEST.to_string()
            }
        );
        assert!(matches!(
            AgenticAction::parse(&request_action(&["src/types.ts"])).unwrap(),
            AgenticAction::RequestFiles { files } if files == ["src/types.ts"]
        ));
    }

    #[test]
    fn test_report_fixture_parses() {
        let report = crate::runner::StructuredReport::parse(JEST_BROKEN_REPORT).unwrap();
        assert_eq!(report.num_failed_tests, 1);
    }
}
