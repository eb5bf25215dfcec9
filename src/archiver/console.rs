use colored::Colorize;

/// Operator-facing action lines, e.g. `COPYING: 'a.jpg' to '2023/06/...'`.
#[derive(Debug, Clone, Copy)]
pub struct Console {
    pub verbose: bool,
}

impl Console {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn action(&self, verb: &str, text: &str) {
        if self.verbose {
            println!("{}: {text}", verb.cyan().bold());
        }
    }

    pub fn skip(&self, text: &str) {
        if self.verbose {
            println!("{}: {text}", "SKIPPING".yellow().bold());
        }
    }

    pub fn ok(&self, verb: &str, text: &str) {
        if self.verbose {
            println!("{}: {text}", verb.green().bold());
        }
    }

    pub fn warn(&self, text: &str) {
        println!("{}: {text}", "WARN".yellow().bold());
    }

    /// Always shown, regardless of verbosity.
    pub fn error(&self, text: &str) {
        eprintln!("{}: {text}", "ERROR".red().bold());
    }

    pub fn invalid(&self, text: &str) {
        eprintln!("{}: {text}", "INVALID".red().bold());
    }

    /// End-of-run lines; printed even when quiet.
    pub fn summary(&self, text: &str) {
        println!("{text}");
    }

    pub fn info(&self, text: &str) {
        if self.verbose {
            println!("{text}");
        }
    }
}
