//! Application context passed to all commands

use console::style;
use ddp_client::{ClientConfig, ConsoleContext, DdpClient, Org, Severity};

pub struct AppContext {
    pub quiet: bool,
    pub config: ClientConfig,
    pub client: DdpClient,
    pub console: ConsoleContext,
}

impl AppContext {
    pub fn new(quiet: bool, config: ClientConfig) -> Self {
        let console = ConsoleContext::new();
        if let Some(slug) = &config.org_slug {
            console.set_current_org(Some(Org {
                slug: slug.clone(),
                name: slug.clone(),
            }));
        }

        Self {
            quiet,
            client: DdpClient::from_config(&config),
            config,
            console,
        }
    }

    pub fn print_header(&self, msg: &str) {
        if !self.quiet {
            println!();
            println!("{}", style(msg).bold());
        }
    }

    pub fn print_warning(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", style(msg).yellow());
        }
    }

    pub fn print_info(&self, msg: &str) {
        if !self.quiet {
            println!("{}", style(msg).cyan());
        }
    }

    /// Print and clear pending notifications. Errors print even when quiet.
    pub fn flush_toasts(&self) {
        for toast in self.console.drain_toasts() {
            let line = match toast.severity {
                Severity::Success => style(toast.message).green(),
                Severity::Error => style(toast.message).red(),
                Severity::Info => style(toast.message).cyan(),
            };
            match toast.severity {
                Severity::Error => eprintln!("{}", line),
                _ if !self.quiet => println!("{}", line),
                _ => {}
            }
            for detail in toast.details {
                if toast.severity == Severity::Error || !self.quiet {
                    eprintln!("  {}", style(detail).dim());
                }
            }
        }
    }
}
