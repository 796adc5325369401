use indicatif::{ProgressBar, ProgressStyle};

pub static PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}";
pub static SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner:2.cyan/blue} {msg}";


pub fn new_spinner(message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(SPINNER_TEMPLATE).expect("Invalid spinner template");
    let spinner = ProgressBar::new_spinner()
        .with_message(message.to_string())
        .with_style(style);

    spinner
}

pub fn new_progress_bar(total: usize, message: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(PROGRESS_TEMPLATE).expect("Invalid progress bar template");
    ProgressBar::new(total as u64)
        .with_message(message.to_string())
        .with_style(style)
}
