/// Answers one inbound request line. `None` closes the connection without a reply.
#[trait_variant::make(LineHandler: Send)]
pub trait LocalLineHandler {
    async fn handle_line(&self, line: &str) -> Option<String>;
}
