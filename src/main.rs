use std::sync::Arc;

use roomsync::{
    firebase::FirebaseFeed, model::format_time, sync::SyncState, AppResult, Backend, ChatClient, Config,
    Identity, MemoryFeed, Message, RemoteFeed, RoomId, Screen,
};
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "/login  /logout  /rooms  /join <room>  /create <name>  /quit";

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "roomsync=info".into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run_from_env().await {
        error!(error = %err, "roomsync exited");
        std::process::exit(1);
    }
}

async fn run_from_env() -> AppResult<()> {
    let config = Config::from_env()?;
    match config.backend {
        Backend::Memory => run(Arc::new(MemoryFeed::new())).await,
        Backend::Firebase => {
            let credentials = config.credentials()?;
            run(Arc::new(FirebaseFeed::new(&config, credentials)?)).await
        }
    }
}

async fn run<F: RemoteFeed>(feed: Arc<F>) -> AppResult<()> {
    let mut client = ChatClient::new(feed);
    client.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = View::new();

    loop {
        view.render(&mut client);

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !command(&mut client, &line) {
                    break;
                }
            }
            _ = client.process_next() => {}
        }
    }

    client.shutdown();
    Ok(())
}

/// Returns false on `/quit`.
fn command<F: RemoteFeed>(client: &mut ChatClient<F>, line: &str) -> bool {
    let line = line.trim_end_matches(['\r', '\n']);
    let (cmd, arg) = line.split_once(' ').unwrap_or((line, ""));

    match cmd {
        "/quit" => return false,
        "/help" => println!("{HELP}"),
        "/login" => client.sign_in(),
        "/logout" => client.sign_out(),
        "/rooms" => {
            for room in client.rooms() {
                let marker = if Some(&room.id) == client.active_room().map(|r| &r.id) { '*' } else { ' ' };
                println!("{marker} #{:<16} {:>3}  {}", room.id, room.member_count, room.description);
            }
        }
        "/join" => {
            if !client.select_room(&RoomId::new(arg.trim())) {
                println!("no such room: {}", arg.trim());
            }
        }
        "/create" => {
            if client.create_room(arg).is_none() {
                println!("sign in and give the room a name first");
            }
        }
        _ => {
            client.set_input(line);
            client.submit();
        }
    }
    true
}

/// Prints what changed since the last render.
struct View {
    offset: UtcOffset,
    screen: Option<Screen>,
    room: Option<RoomId>,
    state: Option<SyncState>,
    shown: Vec<String>,
}

impl View {
    fn new() -> View {
        View {
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
            screen: None,
            room: None,
            state: None,
            shown: Vec::new(),
        }
    }

    fn render<F: RemoteFeed>(&mut self, client: &mut ChatClient<F>) {
        while let Some(notice) = client.take_notice() {
            println!("!! {}", notice.text);
        }

        let screen = client.screen();
        if self.screen != Some(screen) {
            self.screen = Some(screen);
            match screen {
                Screen::Loading => println!("Loading chat application..."),
                Screen::Login => println!("Sign in with /login"),
                Screen::Chat => {
                    if let Some(identity) = client.identity() {
                        println!("Signed in as {}. {HELP}", identity.display_name);
                    }
                }
            }
        }
        if screen != Screen::Chat {
            self.room = None;
            self.shown.clear();
            return;
        }

        let room = client.active_room().map(|room| room.id.clone());
        if self.room != room {
            if let Some(room) = client.active_room() {
                println!("── #{} · {}", room.name, room.description);
            }
            self.room = room;
            self.shown.clear();
        }

        let state = client.sync_state();
        if self.state != Some(state) {
            if state == SyncState::Degraded {
                println!("(offline, showing placeholder messages)");
            }
            self.state = Some(state);
        }

        let messages = client.messages();
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let from = if ids.starts_with(&self.shown) { self.shown.len() } else { 0 };
        let me = client.identity();
        for message in &messages[from..] {
            println!("{}", self.line(message, me));
        }
        self.shown = ids;
    }

    fn line(&self, message: &Message, me: Option<&Identity>) -> String {
        let who = if me.is_some_and(|me| message.is_from(me)) { "you" } else { message.author_name.as_str() };
        format!("[{}] {who}: {}", format_time(message.timestamp.to_offset(self.offset)), message.text)
    }
}
