/// Generates local variable names which cannot collide with names from source programs.
#[derive(Clone, Debug, Default)]
pub struct NameGen {
    next: usize,
}

impl NameGen {
    pub fn new() -> NameGen {
        NameGen { next: 0 }
    }

    pub fn fresh(&mut self, base: &str) -> String {
        let name = format!("{}.{}", base, self.next);
        self.next += 1;
        name
    }
}
