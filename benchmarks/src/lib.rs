//! Shared fixtures for the ScriptHub benchmarks

/// Luau source with `functions` local handlers, each declaring locals,
/// parameters, loop variables, a comment and string literals.
pub fn create_source(functions: usize) -> String {
    (0..functions)
        .map(|i| {
            format!(
                "local function handler_{i}(player, amount)\n  \
                 local total = amount * {i} -- scaled\n  \
                 for index, item in ipairs(player.items) do\n    \
                 total = total + item.value + index\n  \
                 end\n  \
                 print(\"handled {i}\", `total {{total}}`)\n  \
                 return total\n\
                 end\n"
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_source_scales() {
        let source = create_source(3);
        assert_eq!(source.matches("local function handler_").count(), 3);
        assert!(source.contains("handler_2(player, amount)"));
    }
}
