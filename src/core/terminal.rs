use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_banner() {
    println!(
        "\n{} {}\n",
        style("flowwatch").bold().cyan(),
        style("follow an agent task from your terminal").dim()
    );
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Info(String),
    Text(String),
    Blank,
}

/// A titled block of aligned lines for help and summary output.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, about: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), about.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn info(mut self, msg: &str) -> Self {
        self.lines.push(GuideLine::Info(msg.to_string()));
        self
    }

    pub fn text(mut self, msg: &str) -> Self {
        self.lines.push(GuideLine::Text(msg.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                GuideLine::Command(name, _) => Some(name.chars().count()),
                GuideLine::Status(label, _) => Some(label.chars().count() + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        for line in &self.lines {
            match line {
                GuideLine::Command(name, about) => {
                    println!("   {:<width$}  {}", style(name).green(), about, width = width);
                }
                GuideLine::Status(label, value) => {
                    let label = format!("{}:", label);
                    println!(
                        "  {} {:<width$} {}",
                        GEAR,
                        style(label).bold().cyan(),
                        value,
                        width = width
                    );
                }
                GuideLine::Info(msg) => println!("  {} {}", INFO_ICON, msg),
                GuideLine::Text(msg) => println!("   {}", msg),
                GuideLine::Blank => println!(),
            }
        }
    }
}
