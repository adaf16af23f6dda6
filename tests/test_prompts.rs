//! Tests for the analysis prompt files shipped in config/prompts

use std::fs;

use chapterwise::subsystems::analysis::AnalysisPrompts;

#[test]
fn test_system_prompt_file_exists() {
    let path = "config/prompts/analysis_system.md";
    assert!(fs::metadata(path).is_ok(), "analysis_system.md prompt file missing");
}

#[test]
fn test_user_prompt_file_exists() {
    let path = "config/prompts/analysis_user.md";
    assert!(fs::metadata(path).is_ok(), "analysis_user.md prompt file missing");
}

#[test]
fn test_system_prompt_names_every_field() {
    let text = fs::read_to_string("config/prompts/analysis_system.md").unwrap();
    assert!(text.contains("{{book}}"), "analysis_system.md should contain {{book}} variable");
    for field in ["summary", "key_concepts", "tags", "analysis", "reflection", "quotes"] {
        assert!(text.contains(field), "analysis_system.md should describe '{field}'");
    }
}

#[test]
fn test_user_prompt_template_vars() {
    let text = fs::read_to_string("config/prompts/analysis_user.md").unwrap();
    for var in ["{{context}}", "{{title}}", "{{text}}"] {
        assert!(text.contains(var), "analysis_user.md should contain {var} variable");
    }
}

#[test]
fn test_shipped_prompts_render() {
    let prompts = AnalysisPrompts::load("config/prompts", "实践论", 3000);
    assert!(prompts.system().contains("实践论"));
    let user = prompts.user("第一章", "认识从实践始", "Known concepts so far:\n- 矛盾: x");
    assert!(user.contains("第一章"));
    assert!(user.contains("认识从实践始"));
    assert!(user.contains("- 矛盾: x"));
    assert!(!user.contains("{{"));
}
