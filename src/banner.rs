//! Welcome banner printed before a run.

use console::{Term, measure_text_width, style};

use crate::config::ProvisioningRequest;

const TITLE: &str = " Welcome ";
const SUBTITLE: &str = " ptemplate ";

pub struct Banner {
    lines: Vec<String>,
}

impl Banner {
    pub fn for_request(req: &ProvisioningRequest) -> Self {
        let heading = format!(
            "{} {}",
            style("Proxmox Template Builder").bold(),
            style(env!("CARGO_PKG_VERSION")).bold()
        );
        let lines = vec![
            heading,
            env!("CARGO_PKG_DESCRIPTION").to_string(),
            String::new(),
            format!("{} {} (VM {})", style("Template:").bold(), req.vm_name, req.vm_id),
            format!("{} {}", style("Image:   ").bold(), style(req.image.display()).cyan()),
            format!("{} {}", style("Storage: ").bold(), req.storage_pool),
        ];
        Self { lines }
    }

    /// Boxed rendering, one string per terminal line.
    pub fn render(&self) -> Vec<String> {
        let content = self
            .lines
            .iter()
            .map(|l| measure_text_width(l))
            .max()
            .unwrap_or(0);
        let inner = (content + 4)
            .max(TITLE.chars().count() + 2)
            .max(SUBTITLE.chars().count() + 2);

        let rule = |label: &str| {
            let fill = inner - 1 - label.chars().count();
            (format!("\u{2500}{label}"), "\u{2500}".repeat(fill))
        };
        let pad = |line: &str| {
            let fill = inner - 4 - measure_text_width(line);
            format!("\u{2502}  {line}{}  \u{2502}", " ".repeat(fill))
        };

        let (title, title_fill) = rule(TITLE);
        let (sub, sub_fill) = rule(SUBTITLE);
        let border = |s: String| style(s).red().to_string();

        let mut out = Vec::with_capacity(self.lines.len() + 4);
        out.push(border(format!("\u{256d}{title}{title_fill}\u{256e}")));
        out.push(pad(""));
        out.extend(self.lines.iter().map(|l| pad(l)));
        out.push(pad(""));
        out.push(border(format!("\u{2570}{sub_fill}{sub}\u{256f}")));
        out
    }

    pub fn print(&self) {
        let term = Term::stdout();
        for line in self.render() {
            term.write_line(&line).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_request;

    #[test]
    fn banner_lines_have_equal_width() {
        let rendered = Banner::for_request(&test_request()).render();
        let width = measure_text_width(&rendered[0]);
        assert!(rendered.iter().all(|l| measure_text_width(l) == width));
    }

    #[test]
    fn banner_mentions_template_and_version() {
        let text = console::strip_ansi_codes(&Banner::for_request(&test_request()).render().join("\n"))
            .into_owned();
        assert!(text.contains("ubuntu-tmpl (VM 9001)"));
        assert!(text.contains(env!("CARGO_PKG_VERSION")));
        assert!(text.contains("Welcome"));
    }
}
