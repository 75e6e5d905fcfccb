use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    diagnostics::{OrigamiError, Result},
    engine::Engine,
    marshal::marshal,
    source::SourceUnit,
};

/// Interactive loop. Every line is a separate evaluation; variables and
/// declarations from one line are gone on the next.
pub struct Repl {
    engine: Engine,
}

impl Repl {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        loop {
            match editor.readline("zy> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    let unit = SourceUnit::new(trimmed, self.engine.config().virtual_name.as_str());
                    let outcome = self.engine.run(&unit);
                    let rendered = marshal(&outcome);
                    if outcome.is_failure() {
                        eprintln!("{rendered}");
                    } else if !rendered.is_empty() {
                        println!("{rendered}");
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }
}

fn readline_error(err: ReadlineError) -> OrigamiError {
    OrigamiError::from(std::io::Error::other(err))
}
