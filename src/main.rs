use sage_researcher::{Config, Researcher, ResearchTask, StreamEvent, Streamer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sage_researcher=info".into()),
        )
        .init();

    let query: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: sage-research <query>");
        std::process::exit(2);
    }

    let config = Config::load();
    let readiness = config.readiness();
    for (retriever, missing) in &readiness {
        eprintln!("warning: retriever '{retriever}' is missing credentials: {missing:?}");
    }

    let (streamer, mut events) = Streamer::channel(256);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Report { output } => {
                    use std::io::Write;
                    print!("{output}");
                    let _ = std::io::stdout().flush();
                }
                StreamEvent::Logs { output, .. } => eprintln!("{output}"),
                StreamEvent::Error { message } => eprintln!("error: {message}"),
                _ => {}
            }
        }
    });

    let researcher = Researcher::builder(ResearchTask::new(query), config)
        .streamer(streamer)
        .build();
    let output = researcher.run().await?;

    println!("\n\n---");
    println!("visited {} urls", output.visited_urls.len());
    println!("total cost: ${:.4}", output.costs);

    printer.abort();
    Ok(())
}
