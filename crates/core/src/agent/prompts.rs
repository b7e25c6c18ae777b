//! Task instructions sent with every agent run.

/// Goal → independent work items
pub const PLANNER: &str = "\
You plan analysis work. Break the goal into independent work items that can be \
executed in parallel. Reply with JSON: {\"items\": [{\"id\", \"title\", \"spec\"}]}. \
Do not produce more than `max_items` items.";

/// Executed result → dependent work items
pub const DEPENDENT_PLANNER: &str = "\
You plan follow-up work for one finished analysis. `used_calls` lists the \
evidence already gathered; reuse it instead of fetching it again. Reply with \
JSON: {\"items\": [{\"id\", \"title\", \"spec\"}]}, at most `max_items` items.";

/// Work item → result
pub const EXECUTOR: &str = "\
You execute one work item. Use the available tools to gather evidence. When a \
tool answers with budget_exhausted, stop calling it and conclude with what you \
have. Reply with JSON: {\"title\", \"payload\"}.";
