use std::{borrow::Cow, time::Duration};

use crate::util::progress_logger::{ProgressLogger, ProgressSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ProgressMode {
    #[default]
    Hidden,
    Visible,
}

#[derive(Clone, Debug)]
pub struct ProgressBarLogger {
    pass_name: String,
    mode: ProgressMode,
}

pub fn bar(mode: ProgressMode, pass_name: impl ToString) -> ProgressBarLogger {
    ProgressBarLogger {
        pass_name: pass_name.to_string(),
        mode,
    }
}

#[derive(Clone, Debug)]
pub struct ProgressBarSession {
    pass_name: String,
    bar: indicatif::ProgressBar,
}

const TICK_STRINGS: &[&str] = &["⠉", "⠘", "⠰", "⠤", "⠆", "⠃", "✔"];

fn bar_style(counted: bool) -> indicatif::ProgressStyle {
    let (style, template) = if counted {
        (
            indicatif::ProgressStyle::default_bar(),
            "{spinner:.cyan} [{elapsed_precise}] [{bar:.cyan/blue}] {pos}/{len} {msg}",
        )
    } else {
        (
            indicatif::ProgressStyle::default_spinner(),
            "{spinner:.cyan} [{elapsed_precise}] {msg}",
        )
    };

    // The templates are fixed strings, so a parse failure can only fall back to the default look.
    let style = match style.clone().template(template) {
        Ok(templated) => templated,
        Err(_) => style,
    };

    style.progress_chars("=> ").tick_strings(TICK_STRINGS)
}

impl ProgressLogger for ProgressBarLogger {
    type Session = ProgressBarSession;

    fn start_session(self, count: Option<usize>) -> Self::Session {
        let bar = indicatif::ProgressBar::with_draw_target(
            count.map(|count| count as u64),
            match self.mode {
                ProgressMode::Hidden => indicatif::ProgressDrawTarget::hidden(),
                ProgressMode::Visible => indicatif::ProgressDrawTarget::stderr(),
            },
        );
        bar.set_style(bar_style(count.is_some()));
        bar.set_message(Cow::Owned(self.pass_name.clone()));
        bar.enable_steady_tick(Duration::from_millis(100));
        ProgressBarSession {
            pass_name: self.pass_name,
            bar,
        }
    }
}

impl ProgressSession for ProgressBarSession {
    fn update(&mut self, inc: usize) {
        self.bar.inc(inc as u64);
    }

    fn describe(&mut self, what: &str) {
        self.bar
            .set_message(Cow::Owned(format!("{}: {}", self.pass_name, what)));
    }

    fn finish(self) {
        self.bar.finish_with_message(Cow::Owned(self.pass_name));
    }
}
