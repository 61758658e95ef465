//! Interactive chat client with line editing and markdown rendering.
//!
//! Drives the full gateway protocol from one terminal session: wallet
//! sign-in, chat turns with a rolling history window, and client-side
//! execution of deferred fund movements under the retry policy. Uses
//! rustyline for line editing, history, and tab-completion, and termimad
//! for rendering responses inline.
//!
//! ## Commands
//!
//! - `/help` - Show available commands
//! - `/quit` or `/exit` - Exit the chat
//! - `/wallet` - Show wallet and smart account addresses
//! - `/grant <usd> [days]` - Grant a spend permission (default 1 day)
//! - `/permissions` - List spend permissions
//! - `/history` - List past transactions
//! - `/signout` - End the session and exit
//! - `/clear` - Clear the conversation

use std::borrow::Cow;
use std::sync::Arc;

use rust_decimal::Decimal;
use rustyline::completion::Completer;
use rustyline::config::Config;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Editor, Helper};
use termimad::MadSkin;
use tracing::warn;

use crate::agent::Conversation;
use crate::chain;
use crate::client::api::{ApiClient, WalletSigner};
use crate::client::history::{Transaction, TransactionHistory, TransactionStatus};
use crate::client::retry::{MovementApi, RetryExecutor};
use crate::error::Error;
use crate::exec::{OperationKind, PendingOperation, PendingSwap, PendingTransfer};
use crate::gateway::types::ChatResponse;
use crate::permissions::{Allocator, PermissionView};

/// Slash commands available in the chat.
const SLASH_COMMANDS: &[&str] = &[
    "/help",
    "/quit",
    "/exit",
    "/wallet",
    "/grant",
    "/permissions",
    "/history",
    "/signout",
    "/clear",
];

/// Rustyline helper for slash-command tab completion.
struct ReplHelper;

impl Completer for ReplHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if !line.starts_with('/') {
            return Ok((0, vec![]));
        }

        let prefix = &line[..pos];
        let matches: Vec<String> = SLASH_COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .map(|cmd| cmd.to_string())
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if !line.starts_with('/') || pos < line.len() {
            return None;
        }

        SLASH_COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && **cmd != line)
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for ReplHelper {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Cow::Owned(format!("\x1b[90m{hint}\x1b[0m"))
    }
}

impl Validator for ReplHelper {}
impl Helper for ReplHelper {}

/// Build a termimad skin with our color scheme.
fn make_skin() -> MadSkin {
    let mut skin = MadSkin::default();
    skin.set_headers_fg(termimad::crossterm::style::Color::Yellow);
    skin.bold.set_fg(termimad::crossterm::style::Color::White);
    skin.italic
        .set_fg(termimad::crossterm::style::Color::Magenta);
    skin.inline_code
        .set_fg(termimad::crossterm::style::Color::Green);
    skin.code_block
        .set_fg(termimad::crossterm::style::Color::Green);
    skin.code_block.left_margin = 2;
    skin
}

fn print_help() {
    // Bold white for section headers, bold cyan for commands, dim gray for descriptions
    let h = "\x1b[1m"; // bold (section headers)
    let c = "\x1b[1;36m"; // bold cyan (commands)
    let d = "\x1b[90m"; // dim gray (descriptions)
    let r = "\x1b[0m"; // reset

    println!();
    println!("  {h}Basepilot chat{r}");
    println!();
    println!("  {h}Commands{r}");
    println!("  {c}/help{r}                {d}show this help{r}");
    println!("  {c}/quit{r} {c}/exit{r}          {d}exit the chat{r}");
    println!("  {c}/clear{r}               {d}clear the conversation{r}");
    println!();
    println!("  {h}Wallet{r}");
    println!("  {c}/wallet{r}              {d}show wallet and smart account addresses{r}");
    println!("  {c}/grant <usd> [days]{r}  {d}grant a spend permission (default 1 day){r}");
    println!("  {c}/permissions{r}         {d}list spend permissions{r}");
    println!("  {c}/history{r}             {d}list past transactions{r}");
    println!("  {c}/signout{r}             {d}end the session and exit{r}");
    println!();
}

/// Get the line-editor history file path (~/.basepilot/history).
fn history_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".basepilot")
        .join("history")
}

fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(w, _)| w as usize)
        .unwrap_or(80)
}

/// Render a response as markdown under a dim separator line.
fn render_markdown(content: &str) {
    let width = terminal_width();
    let sep_width = width.min(80);
    eprintln!("\x1b[90m{}\x1b[0m", "\u{2500}".repeat(sep_width));

    let skin = make_skin();
    let text = termimad::FmtText::from(&skin, content, Some(width));
    print!("{text}");
    println!();
}

fn print_error(err: impl std::fmt::Display) {
    eprintln!("\x1b[31merror:\x1b[0m {err}");
}

fn permission_line(view: &PermissionView) -> String {
    let color = if view.status.is_active() {
        "\x1b[32m"
    } else {
        "\x1b[90m"
    };
    format!(
        "  {color}\u{25CF}\x1b[0m {} USDC / {} day(s)  {}  \x1b[90m{}\x1b[0m",
        chain::format_usdc(view.permission.allowance),
        view.permission.period_in_days,
        view.status,
        view.permission.permission_hash
    )
}

fn transaction_line(tx: &Transaction) -> String {
    let (icon, color) = match tx.status {
        TransactionStatus::Completed => ("\u{25CF}", "\x1b[32m"),
        TransactionStatus::Failed => ("\u{2717}", "\x1b[31m"),
        TransactionStatus::Pending => ("\u{25CB}", "\x1b[33m"),
    };
    let target = match tx.kind {
        OperationKind::Transfer => tx.recipient.as_deref().unwrap_or("?"),
        OperationKind::Swap => tx.to_token.as_deref().unwrap_or("?"),
    };
    format!(
        "  {color}{icon}\x1b[0m {} ${} \u{2192} {}  \x1b[90m{}\x1b[0m",
        tx.kind,
        tx.amount,
        target,
        tx.timestamp.format("%Y-%m-%d %H:%M")
    )
}

/// Terminal chat session against one gateway.
pub struct ChatRepl {
    api: Arc<ApiClient>,
    executor: RetryExecutor,
    allocator: Arc<Allocator>,
    signer: WalletSigner,
    history: TransactionHistory,
    conversation: Conversation,
}

impl ChatRepl {
    pub fn new(api: Arc<ApiClient>, allocator: Arc<Allocator>, signer: WalletSigner) -> Self {
        let movement: Arc<dyn MovementApi> = api.clone();
        Self {
            executor: RetryExecutor::new(movement, allocator.clone()),
            history: TransactionHistory::new(TransactionHistory::default_path()),
            conversation: Conversation::new(),
            api,
            allocator,
            signer,
        }
    }

    /// Runs the session to completion: sign in, then read lines until
    /// `/quit`, `/signout`, or Ctrl+D.
    pub async fn run(mut self) -> Result<(), Error> {
        println!("\x1b[1mBasepilot\x1b[0m  /help for commands, /quit to exit");
        println!("\x1b[90mgateway {}\x1b[0m", self.api.base_url());

        let address = self.api.sign_in(&self.signer).await?;
        let wallet = self.api.server_wallet().await?;
        println!("\x1b[90msigned in as {address}\x1b[0m");
        println!(
            "\x1b[90msmart account {}\x1b[0m",
            wallet.smart_account_address
        );
        println!();

        let config = Config::builder()
            .history_ignore_dups(true)
            .expect("valid config")
            .auto_add_history(true)
            .completion_type(CompletionType::List)
            .build();

        let mut editor = match Editor::with_config(config) {
            Ok(editor) => editor,
            Err(e) => {
                eprintln!("Failed to initialize line editor: {e}");
                return Ok(());
            }
        };
        editor.set_helper(Some(ReplHelper));

        let hist_path = history_path();
        if let Some(parent) = hist_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.load_history(&hist_path);

        // Readline blocks, so each line moves the editor through a blocking
        // task and back. There is no server push to interleave with input:
        // every response arrives inside the turn that asked for it.
        loop {
            let handle = tokio::task::spawn_blocking(move || {
                let result = editor.readline("\x1b[1;36m\u{203A}\x1b[0m ");
                (result, editor)
            });
            let (result, returned) = match handle.await {
                Ok(pair) => pair,
                Err(_) => return Ok(()),
            };
            editor = returned;

            match result {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if line.starts_with('/') {
                        if self.handle_command(&line).await {
                            break;
                        }
                        continue;
                    }
                    if let Err(e) = self.chat_turn(&line).await {
                        print_error(e);
                    }
                }
                // Ctrl+C drops the line being edited.
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("Input error: {e}");
                    break;
                }
            }
        }

        let _ = editor.save_history(&history_path());
        Ok(())
    }

    /// Dispatches one slash command. Returns true when the session should end.
    async fn handle_command(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = parts.collect();

        match command.as_str() {
            "/quit" | "/exit" => return true,
            "/help" => print_help(),
            "/clear" => {
                self.conversation.clear();
                println!("\x1b[90mconversation cleared\x1b[0m");
            }
            "/wallet" => self.show_wallet().await,
            "/grant" => self.grant(&args).await,
            "/permissions" => self.show_permissions().await,
            "/history" => self.show_history(),
            "/signout" => return self.sign_out().await,
            _ => println!("\x1b[90munknown command, /help lists commands\x1b[0m"),
        }
        false
    }

    async fn show_wallet(&self) {
        match self.api.server_wallet().await {
            Ok(wallet) => {
                println!("  \x1b[90mwallet:\x1b[0m        {}", wallet.address);
                println!(
                    "  \x1b[90mserver signer:\x1b[0m {}",
                    wallet.server_wallet_address
                );
                println!(
                    "  \x1b[90msmart account:\x1b[0m {}",
                    wallet.smart_account_address
                );
            }
            Err(e) => print_error(e),
        }
    }

    async fn grant(&self, args: &[&str]) {
        let Some(raw_amount) = args.first() else {
            println!("\x1b[90musage: /grant <usd> [days]\x1b[0m");
            return;
        };
        let Ok(amount) = raw_amount.parse::<Decimal>() else {
            print_error(format!("{raw_amount} is not a USD amount"));
            return;
        };
        let days = match args.get(1) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(days) => days,
                Err(_) => {
                    print_error(format!("{raw} is not a day count"));
                    return;
                }
            },
            None => 1,
        };

        match self
            .allocator
            .request_allowance(self.signer.address(), amount, days)
            .await
        {
            Ok(permission) => {
                println!(
                    "  \x1b[32m\u{25CF}\x1b[0m granted {} USDC over {} day(s)  \x1b[90m{}\x1b[0m",
                    chain::format_usdc(permission.allowance),
                    permission.period_in_days,
                    permission.permission_hash
                );
            }
            Err(e) => print_error(e),
        }
    }

    async fn show_permissions(&self) {
        match self.allocator.list_permissions(self.signer.address()).await {
            Ok(views) if views.is_empty() => {
                println!("\x1b[90mno spend permissions, /grant <usd> creates one\x1b[0m");
            }
            Ok(views) => {
                for view in views {
                    println!("{}", permission_line(&view));
                }
            }
            Err(e) => print_error(e),
        }
    }

    fn show_history(&self) {
        match self.history.list(self.signer.address()) {
            Ok(transactions) if transactions.is_empty() => {
                println!("\x1b[90mno transactions yet\x1b[0m");
            }
            Ok(transactions) => {
                for tx in transactions {
                    println!("{}", transaction_line(&tx));
                }
            }
            Err(e) => print_error(e),
        }
    }

    async fn sign_out(&self) -> bool {
        match self.api.sign_out().await {
            Ok(response) => {
                println!("\x1b[90m{}\x1b[0m", response.message);
                true
            }
            Err(e) => {
                print_error(e);
                false
            }
        }
    }

    /// Sends one message and folds the reply, plus any client-side
    /// execution outcome, into the conversation.
    async fn chat_turn(&mut self, message: &str) -> Result<(), Error> {
        // Window first: the prompt must not repeat the in-flight message.
        let window = self.conversation.window();
        self.conversation.push_user(message);
        let reply = self.api.chat(message, &window).await?;

        render_markdown(&reply.response);

        if reply.execute_client_side == Some(true) {
            self.execute_pending(reply).await;
            return Ok(());
        }

        let tool_used = reply.tool_used;
        self.conversation.push_assistant(reply.response, tool_used);
        Ok(())
    }

    /// Runs a deferred fund movement end to end: record it pending, execute
    /// under the retry policy, resolve the record, and fold the outcome
    /// into the conversation.
    async fn execute_pending(&mut self, reply: ChatResponse) {
        let Some(params) = reply.transaction_params else {
            print_error("operation is missing its transaction parameters");
            return;
        };
        let user = self.signer.address().to_string();

        let operation = if reply.swap_type.as_deref() == Some("usdc-to-token") {
            serde_json::from_value::<PendingSwap>(params).map(PendingOperation::Swap)
        } else {
            serde_json::from_value::<PendingTransfer>(params).map(PendingOperation::Transfer)
        };
        let operation = match operation {
            Ok(operation) => operation,
            Err(e) => {
                print_error(format!("malformed transaction parameters: {e}"));
                return;
            }
        };

        println!(
            "\x1b[90mExecuting {} (with retry logic)...\x1b[0m",
            operation.kind()
        );
        let record = match &operation {
            PendingOperation::Transfer(t) => Transaction::transfer(&t.amount_usd, &t.recipient),
            PendingOperation::Swap(s) => Transaction::swap(&s.amount_usd, &s.token_address),
        };
        let record_id = record.id.clone();
        if let Err(e) = self.history.record(&user, record) {
            warn!(error = %e, "could not record pending operation");
        }

        let report = match &operation {
            PendingOperation::Transfer(t) => self.executor.execute_transfer(t).await,
            PendingOperation::Swap(s) => self.executor.execute_swap(s, None).await,
        };

        let status = if report.success {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Failed
        };
        if let Err(e) = self.history.set_status(
            &user,
            &record_id,
            status,
            report.transaction_hash.as_deref(),
        ) {
            warn!(error = %e, "could not resolve transaction record");
        }

        if report.success {
            println!("  \x1b[32m\u{25CF}\x1b[0m {}", report.message);
        } else {
            println!("  \x1b[31m\u{2717}\x1b[0m {}", report.message);
        }

        let mut assistant = format!("{}\n\n{}", reply.response, report.message);
        if report.success {
            if let Some(url) = &report.explorer_url {
                println!("  \x1b[90mView transaction: {url}\x1b[0m");
                assistant.push_str(&format!("\n\nView transaction: {url}"));
            }
        }
        self.conversation.push_assistant(assistant, reply.tool_used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionStatus, SpendPermission};

    fn view(status: PermissionStatus) -> PermissionView {
        PermissionView {
            permission: SpendPermission {
                account: "0x1111111111111111111111111111111111111111".to_string(),
                spender: "0x2222222222222222222222222222222222222222".to_string(),
                token: chain::USDC_ADDRESS.to_string(),
                chain_id: chain::BASE_CHAIN_ID,
                allowance: 2_500_000,
                period_in_days: 7,
                start: 1,
                end: None,
                signature: "0xsig".to_string(),
                permission_hash: "0xhash1".to_string(),
            },
            status,
        }
    }

    #[test]
    fn permission_lines_show_allowance_period_and_status() {
        let line = permission_line(&view(PermissionStatus::Active));
        assert!(line.contains("2.5 USDC"));
        assert!(line.contains("7 day(s)"));
        assert!(line.contains("active"));
        assert!(line.contains("0xhash1"));

        let expired = permission_line(&view(PermissionStatus::Expired));
        assert!(expired.contains("expired"));
    }

    #[test]
    fn transfer_lines_name_the_recipient() {
        let mut tx = Transaction::transfer("0.5", "0x3333333333333333333333333333333333333333");
        tx.status = TransactionStatus::Completed;

        let line = transaction_line(&tx);
        assert!(line.contains("transfer"));
        assert!(line.contains("$0.5"));
        assert!(line.contains("0x3333333333333333333333333333333333333333"));
        assert!(line.contains("\u{25CF}"));
    }

    #[test]
    fn swap_lines_name_the_destination_token() {
        let tx = Transaction::swap("1", "0x4200000000000000000000000000000000000006");

        let line = transaction_line(&tx);
        assert!(line.contains("swap"));
        assert!(line.contains("$1"));
        assert!(line.contains("0x4200000000000000000000000000000000000006"));
        // Freshly recorded movements render as pending.
        assert!(line.contains("\u{25CB}"));
    }

    #[test]
    fn help_and_completion_cover_the_same_commands() {
        for cmd in SLASH_COMMANDS {
            assert!(cmd.starts_with('/'));
        }
        assert!(SLASH_COMMANDS.contains(&"/grant"));
        assert!(SLASH_COMMANDS.contains(&"/permissions"));
        assert!(SLASH_COMMANDS.contains(&"/history"));
    }
}
