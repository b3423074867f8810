//! Physics step: ball motion, scoring and re-serve

use rand::Rng;
use tracing::debug;

use super::collision::{detect, CollisionOutcome};
use super::r#match::{Ball, Match, MatchError, MatchStatus, Side};

/// Advance a match by one time slice.
///
/// Does nothing unless the match is in progress, so calling it again after a
/// finish leaves the ball where it was. Re-serve direction after a goal is
/// drawn from `rng`.
pub fn advance<R: Rng + ?Sized>(
    game: &mut Match,
    dt: f64,
    rng: &mut R,
) -> Result<CollisionOutcome, MatchError> {
    if game.status() != MatchStatus::InProgress {
        return Ok(CollisionOutcome::default());
    }

    let current = game.ball();
    let mut ball = Ball::new(
        current.x + current.dx * dt,
        current.y + current.dy * dt,
        current.dx,
        current.dy,
    );

    let paddles: Vec<_> = game
        .players()
        .iter()
        .enumerate()
        .map(|(seat, p)| (Side::from_seat(seat), p.paddle))
        .collect();
    let outcome = detect(&ball, game.config(), &paddles);

    if outcome.reflects_x {
        ball.dx = -ball.dx;
    }
    if outcome.reflects_y {
        ball.dy = -ball.dy;
    }
    game.update_ball(ball);

    if let Some(side) = outcome.scored_by {
        let mut score = game.score();
        score.increment(side);
        game.update_score(score);
        debug!(
            match_id = %game.id(),
            ?side,
            player1 = score.player1,
            player2 = score.player2,
            "Point scored"
        );

        let limit = game.config().score_limit;
        if score.player1 >= limit || score.player2 >= limit {
            game.finish()?;
        } else {
            let serve = Ball::serve(game.config(), serve_direction(rng));
            game.update_ball(serve);
        }
    }

    Ok(outcome)
}

/// Uniformly random re-serve direction, +1 or -1
pub fn serve_direction<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    if rng.gen_bool(0.5) {
        1.0
    } else {
        -1.0
    }
}
