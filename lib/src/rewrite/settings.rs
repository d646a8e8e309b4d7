/// Options for rewriting classes
pub struct Settings {
    /// Rewrite every method that verifies, not just the ones using subroutines
    ///
    /// Rewriting a method without subroutines only drops unreachable code (and the
    /// `StackMapTable`), so this is mostly useful for checking the rewriter itself.
    pub inline_all: bool,

    /// Fall back to type inference when type checking a version 50 class fails
    ///
    /// This only matters when a type checking strategy is supplied.
    pub allow_fallback: bool,

    /// Keep going after a method fails to verify or rewrite
    ///
    /// The failing methods are left unchanged and reported at the end.
    pub keep_going: bool,

    /// Drop the `StackMapTable` of rewritten methods
    ///
    /// The offsets in the table refer to the original code, so the table can't be kept. When this
    /// is off, methods with a `StackMapTable` are left unchanged instead.
    pub drop_stack_map_tables: bool,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            inline_all: false,
            allow_fallback: true,
            keep_going: false,
            drop_stack_map_tables: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
