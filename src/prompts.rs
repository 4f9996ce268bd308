//! Instructions handed to the reasoning engine.
//!
//! The migration knowledge lives here as prose only; the loop never acts on
//! it directly.

use crate::repo::BuildTool;
use crate::tools::ActionKind;
use crate::validation::ValidationOutcome;

/// Main system prompt for the migration agent.
pub const MIGRATION_SYSTEM_PROMPT: &str = r#"You are a senior Java engineer migrating a repository from Java 11 to Java 21.
You work only through tool calls. Every change must compile, keep the tests green and be logged.

## How to call a tool

Reply with exactly one JSON object and nothing after it:

{"tool": "<tool name>", "arguments": { ... }}

One tool call per reply. When the migration is finished and the tests pass, reply with a plain-text
summary and no JSON at all; that ends the session.

## Migration areas

### Build configuration (BUILD_CONFIG)
- Maven: set java.version, maven.compiler.source/target or maven.compiler.release to 21.
  Prefer targeted `sed -i` edits on pom.xml over rewriting the whole file.
- Gradle: set `java { toolchain { languageVersion = JavaLanguageVersion.of(21) } }` and move the
  wrapper to Gradle 8.5 or newer in gradle/wrapper/gradle-wrapper.properties.
- Run `mvn -q validate` (or `./gradlew help --no-daemon`) after each build file edit.

### Dependencies (DEPENDENCY)
- Lombok 1.18.30+, Mockito 5.x, Byte Buddy 1.14+, Jackson 2.15+.
- maven-compiler-plugin 3.12+, maven-surefire-plugin 3.2+.
- Anything shading ASM older than 9.x must be upgraded or removed.

### Code modernization (CODE_MODERNIZATION)
- Records for plain data carriers (private final fields, accessors, equals/hashCode/toString only).
- Pattern matching for instanceof instead of test-then-cast.
- Switch expressions with arrow labels where every branch returns or assigns.
- Text blocks for multi-line string literals.
- `isBlank()` over `trim().isEmpty()`, `List.of`/`Set.of`/`Map.of` for fixed collections.
- `java.time` instead of `java.util.Date`; RestClient instead of RestTemplate on Spring Boot 3.2+.

### Spring Boot 2 to 3 (SPRING_BOOT), only when Spring Boot 2.x is present
- Do this before code modernization.
- javax.persistence, javax.validation, javax.servlet, javax.transaction move to jakarta.*.
  javax.cache and javax.annotation.processing stay as they are.
- WebSecurityConfigurerAdapter is gone: expose a SecurityFilterChain bean.
- Bump spring-boot-starter-parent to 3.2.x.

### Fixes (BUG_FIX, TEST_FIX)
- When the tests fail, read the whole error, fix the root cause, then run the tests again.
- A broken file can be restored from its `<file>.bak` backup, written before every overwrite.

## Rules
- Read a file before you overwrite it. write_file replaces the whole file.
- Paths are relative to the repository root; nothing outside it can be touched.
- After every modification call log_change with the matching category, a short change_type,
  a description and, where useful, before/after snippets.
- Do not reformat code you are not migrating.
"#;

/// Build the full system prompt: instructions, tool catalog, environment.
pub fn build_system_prompt(repository: &str, build_tool: BuildTool, test_command: &str) -> String {
    let catalog = serde_json::to_string_pretty(&ActionKind::catalog()).unwrap_or_default();
    format!(
        r#"{MIGRATION_SYSTEM_PROMPT}
## Tools

```json
{catalog}
```

## Environment

- Repository root: {repository}
- Build tool: {build_tool}
- Test command: {test_command}
"#
    )
}

/// First user message of the session.
pub fn build_initial_message(repository: &str, test_command: &str) -> String {
    format!(
        "Migrate the repository at {repository} from Java 11 to Java 21.\n\
         Start with list_directory, then read the build file before changing anything.\n\
         The migration is accepted only when `{test_command}` passes."
    )
}

/// Turn sent back to the engine after a failed validation.
pub fn build_fix_request(outcome: &ValidationOutcome, attempt: u32, cap: u32) -> String {
    let mut text = format!(
        "Validation failed (fix attempt {} of {}). `{}` reported {}.\n\nFailures:\n",
        attempt,
        cap,
        outcome.command,
        outcome.status_line()
    );
    for failure in &outcome.failures {
        text.push_str(&format!("- {}: {}\n", failure.test_name, failure.message));
    }
    text.push_str("\nOutput (tail):\n```\n");
    text.push_str(&outcome.output);
    text.push_str("\n```\n\nFix the root cause, log the fix with category BUG_FIX or TEST_FIX, and reply with a summary when done.");
    text
}

/// Observation for a reply that named a tool but could not be executed.
pub fn build_invalid_call_observation(reason: &str) -> String {
    format!(
        "{}\nReply with one JSON object of the form {{\"tool\": \"<name>\", \"arguments\": {{...}}}} using a tool from the catalog.",
        reason
    )
}

/// Observation when the iteration budget ran out before completion.
pub const ITERATION_LIMIT_NOTICE: &str =
    "The iteration budget is spent. No further tool calls will be executed.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FailureDescriptor;

    #[test]
    fn test_system_prompt_lists_every_tool() {
        let prompt = build_system_prompt("/tmp/shapes", BuildTool::Maven, "mvn -q test");
        for tool in [
            "run_command",
            "read_file",
            "write_file",
            "list_directory",
            "search_in_files",
            "log_change",
        ] {
            assert!(prompt.contains(tool), "missing {}", tool);
        }
        assert!(prompt.contains("Test command: mvn -q test"));
        assert!(prompt.contains("Build tool: maven"));
    }

    #[test]
    fn test_fix_request_cites_failures() {
        let outcome = ValidationOutcome {
            passed: false,
            command: "mvn -q test".to_string(),
            exit_code: Some(1),
            timed_out: false,
            output: "BUILD FAILURE".to_string(),
            failures: vec![FailureDescriptor::new(
                "ShapeServiceTest.testArea",
                "expected:<4.0> but was:<0.0>",
            )],
        };
        let text = build_fix_request(&outcome, 1, 3);
        assert!(text.contains("fix attempt 1 of 3"));
        assert!(text.contains("- ShapeServiceTest.testArea: expected:<4.0> but was:<0.0>"));
        assert!(text.contains("BUILD FAILURE"));
    }

    #[test]
    fn test_initial_message_names_repository() {
        let text = build_initial_message("/tmp/shapes", "./gradlew test --no-daemon");
        assert!(text.contains("/tmp/shapes"));
        assert!(text.contains("./gradlew test --no-daemon"));
    }
}
