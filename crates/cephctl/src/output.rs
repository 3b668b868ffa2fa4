use clap::ValueEnum;
use comfy_table::{Cell, Color, Table};
use eyre::Result as EyreResult;
use serde::Serialize;

#[derive(Clone, Copy, Debug)]
pub struct OutputWriter {
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    Markdown,
    #[default]
    PlainText,
}

impl OutputWriter {
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn write_str(self, line: &str) {
        match self.format {
            OutputFormat::Markdown => println!("{line}  "),
            OutputFormat::PlainText => println!("{line}"),
        }
    }

    pub fn write_header(self, header: &str, level: usize) {
        match self.format {
            OutputFormat::Markdown => println!("{} {}  ", "#".repeat(level), header),
            OutputFormat::PlainText => {
                let rule = "-".repeat(level.saturating_mul(5));
                println!("{rule}{header}{rule}");
            }
        }
    }

    pub fn write_list<I, S>(self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            match self.format {
                OutputFormat::Markdown => println!("- {}", item.as_ref()),
                OutputFormat::PlainText => println!("{}", item.as_ref()),
            }
        }
    }

    pub fn write_table(self, header: &[&str], rows: Vec<Vec<String>>) {
        match self.format {
            OutputFormat::Markdown => {
                println!("| {} |", header.join(" | "));
                println!("|{}", " --- |".repeat(header.len()));
                for row in rows {
                    println!("| {} |", row.join(" | "));
                }
            }
            OutputFormat::PlainText => {
                let mut table = Table::new();
                let _ = table.set_header(header.iter().map(Cell::new));
                for row in rows {
                    let _ = table.add_row(row);
                }
                println!("{table}");
            }
        }
    }

    pub fn write_json<T>(self, json: &T) -> EyreResult<()>
    where
        T: ?Sized + Serialize,
    {
        match self.format {
            OutputFormat::Markdown => {
                println!("```json\n{}\n```", serde_json::to_string_pretty(json)?);
            }
            OutputFormat::PlainText => {
                println!("{}", serde_json::to_string_pretty(json)?);
            }
        }

        Ok(())
    }

    pub fn write_error(self, label: &str, message: &str) {
        match self.format {
            OutputFormat::Markdown => println!("**{label}**: {message}  "),
            OutputFormat::PlainText => {
                let mut table = Table::new();
                let _ = table.set_header(vec![Cell::new(label).fg(Color::Red)]);
                let _ = table.add_row(vec![message]);
                println!("{table}");
            }
        }
    }
}
