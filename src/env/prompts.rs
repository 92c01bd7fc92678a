//! 默认系统提示词模板

use crate::tools::tool_call_schema_json;

/// 工具环境模板；`{tool_descriptions}` 替换为渲染后的工具说明，`{tool_call_schema}` 替换为调用格式的 JSON Schema
pub const DEFAULT_TOOL_PROMPT_TEMPLATE: &str = "You have access to the following tools to help solve problems:

{tool_descriptions}

For each step:
1. Think through your reasoning inside <think> tags
2. If needed, use a tool by writing a JSON command inside <tool> tags with:
   - \"name\": the tool to use
   - \"args\": the arguments for the tool
   The JSON inside <tool> tags must match this schema:
{tool_call_schema}
3. You will see the tool's output inside <result> tags
4. Continue until you can give the final answer inside <answer> tags

Tools expect specific JSON input formats. Follow the examples carefully.
Do not make up tools or arguments that aren't listed.";

/// 代码环境提示词
pub const CODE_PROMPT: &str = "Given a math problem, use step-by-step reasoning and code execution to solve the problem.

For each step:
1. Think through your reasoning inside <think> tags
2. Write Python scripts inside <code> tags to work out calculations
   - Functions and variables do not persist across <code> calls and should be redefined each time
   - Scripts should be written in Python 3.10+ syntax, and should run in under 10 seconds
   - Any desired outputs should be printed using print() statements
3. You will see the output from print() statements in your code inside <output> tags
4. Continue until you can give the final answer inside <answer> tags";

/// 用工具说明与调用格式填充模板
pub fn render_tool_prompt(template: &str, tool_descriptions: &str) -> String {
    let mut prompt = template.replace("{tool_descriptions}", tool_descriptions);
    if prompt.contains("{tool_call_schema}") {
        prompt = prompt.replace("{tool_call_schema}", &tool_call_schema_json());
    }
    prompt
}
