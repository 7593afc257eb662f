use chat_memory::{
    config::AppConfig,
    documents::WebpageReader,
    llm::build_chat_model,
    select_policy, ConversationSession,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they do not interleave with the conversation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let model = build_chat_model(&config.llm)?;
    let collaborators = config.collaborators(model.clone())?;
    let memory = select_policy(config.policy, &collaborators);

    let greeting = config.greeting.as_deref();
    let mut session = ConversationSession::new(Uuid::new_v4(), memory, greeting)?;
    let documents = WebpageReader::new()?;

    if !config.context_urls.is_empty() {
        let document = documents.read_all(&config.context_urls).await?;
        session.set_context(&document)?;
        println!("(pinned {} characters of reference text)", document.len());
    }

    info!(session_id = %session.session_id(), policy = %config.policy, "Chat session started");

    println!("Chatting with {} using {}", model.name(), config.policy);
    println!("Commands: /context <url>..., /context clear, /history, /reset, /quit\n");
    if let Some(text) = greeting {
        println!("assistant: {}\n", text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset(greeting)?;
                println!("(conversation cleared)\n");
                continue;
            }
            "/history" => {
                for turn in session.log().turns() {
                    let label = if turn.is_summary() { "summary" } else { turn.role().as_str() };
                    println!("[{}] {}", label, turn.content());
                }
                println!();
                continue;
            }
            "/context clear" => {
                if session.clear_context() {
                    println!("(reference document removed)\n");
                } else {
                    println!("(no reference document pinned)\n");
                }
                continue;
            }
            _ => {}
        }

        if let Some(rest) = input.strip_prefix("/context") {
            let urls: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            match documents.read_all(&urls).await {
                Ok(document) => match session.set_context(&document) {
                    Ok(()) => println!("(pinned {} characters of reference text)\n", document.len()),
                    Err(e) => println!("(context rejected: {})\n", e),
                },
                Err(e) => {
                    warn!("Context load failed: {}", e);
                    println!("(could not load context: {})\n", e);
                }
            }
            continue;
        }

        match session.send(input, model.as_ref()).await {
            Ok(report) => {
                println!("assistant: {}", report.reply);

                let memory = &report.memory;
                let mut status = format!("({} turns sent", memory.turns_sent);
                if let Some(tokens) = memory.total_tokens {
                    status.push_str(&format!(", {} tokens", tokens));
                }
                if memory.summarized {
                    status.push_str(", summarized");
                }
                if memory.dropped > 0 {
                    status.push_str(&format!(", {} dropped", memory.dropped));
                }
                if memory.tail_exceeds_budget {
                    status.push_str(", last exchange exceeds token budget");
                }
                println!("{})\n", status);
            }
            Err(e) if e.is_retryable() => {
                warn!("Turn failed: {}", e);
                println!("(turn failed, try again: {})\n", e);
            }
            Err(e) => {
                println!("(turn rejected: {})\n", e);
            }
        }
    }

    Ok(())
}
