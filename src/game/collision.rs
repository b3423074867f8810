//! Ball collision rule against walls, goal lines and paddles

use super::r#match::{Ball, MatchConfig, Paddle, Side};

/// Ball radius in arena units
pub const BALL_RADIUS: f64 = 8.0;

/// Result of testing a proposed ball position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollisionOutcome {
    pub reflects_x: bool,
    pub reflects_y: bool,
    /// Side credited with a point, if the ball crossed a goal line
    pub scored_by: Option<Side>,
}

impl CollisionOutcome {
    pub fn is_goal(&self) -> bool {
        self.scored_by.is_some()
    }
}

/// Test a moved ball against the arena and both paddles.
///
/// Goal lines are checked first, so a ball past a paddle scores even if the
/// paddle box overlaps it on the same frame. A goal short-circuits the other
/// checks. Reflections are only reported while the ball is travelling toward
/// the surface it touches, so a ball that overlaps on consecutive frames does
/// not flip back and forth.
pub fn detect(ball: &Ball, arena: &MatchConfig, paddles: &[(Side, Paddle)]) -> CollisionOutcome {
    if ball.x < 0.0 {
        return CollisionOutcome {
            scored_by: Some(Side::Right),
            ..Default::default()
        };
    }
    if ball.x > arena.arena_width {
        return CollisionOutcome {
            scored_by: Some(Side::Left),
            ..Default::default()
        };
    }

    let mut outcome = CollisionOutcome::default();

    let hits_top = ball.y - BALL_RADIUS <= 0.0 && ball.dy < 0.0;
    let hits_bottom = ball.y + BALL_RADIUS >= arena.arena_height && ball.dy > 0.0;
    outcome.reflects_y = hits_top || hits_bottom;

    outcome.reflects_x = paddles.iter().any(|(side, paddle)| {
        let approaching = match side {
            Side::Left => ball.dx < 0.0,
            Side::Right => ball.dx > 0.0,
        };
        approaching && overlaps(ball, paddle)
    });

    outcome
}

fn overlaps(ball: &Ball, paddle: &Paddle) -> bool {
    ball.x + BALL_RADIUS >= paddle.x
        && ball.x - BALL_RADIUS <= paddle.x + paddle.width
        && ball.y + BALL_RADIUS >= paddle.y
        && ball.y - BALL_RADIUS <= paddle.y + paddle.height
}
