use serde::Deserialize;
use utoipa::IntoParams;

/// Query string of the event stream.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventStreamQuery {
    /// Comma-separated event names, e.g. `question.show,round.results`. Every
    /// event is streamed when omitted.
    pub names: Option<String>,
}
